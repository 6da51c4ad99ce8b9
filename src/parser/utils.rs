/// Width and height, in pixels, as declared by a `RESOLUTION` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Byte range of a resource as declared by `EXT-X-BYTERANGE` or by the
/// `BYTERANGE` attribute of `EXT-X-MAP`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// Amount of bytes in the range.
    pub length: u64,

    /// Offset of the first byte. When `None`, the range starts right after the
    /// previous range of the same resource.
    pub offset: Option<u64>,
}

/// Parse a `<width>x<height>` value. Any deviation from that format gives `None`.
pub(super) fn parse_resolution(value: &str) -> Option<Resolution> {
    let x_idx = value.find(['x', 'X'])?;
    let width = value[..x_idx].trim().parse::<u32>().ok()?;
    let height = value[x_idx + 1..].trim().parse::<u32>().ok()?;
    Some(Resolution { width, height })
}

/// Parse a `<n>[@<o>]` byte range.
pub(super) fn parse_byte_range(value: &str) -> Option<ByteRange> {
    let value = value.trim();
    let (length, offset) = match value.find('@') {
        Some(idx) => (&value[..idx], Some(&value[idx + 1..])),
        None => (value, None),
    };
    let length = length.parse::<u64>().ok()?;
    if length == 0 {
        return None;
    }
    let offset = match offset {
        Some(o) => Some(o.parse::<u64>().ok()?),
        None => None,
    };
    Some(ByteRange { length, offset })
}

/// Parse the leading decimal part of `value` (e.g. `"10.5"` in `"10.5,title"`),
/// accepting both integers and floating point numbers.
pub(super) fn parse_decimal_floating_point(value: &str) -> Option<f64> {
    let end = value.find(',').unwrap_or(value.len());
    let val = value[..end].trim().parse::<f64>().ok()?;
    if val.is_finite() {
        Some(val)
    } else {
        None
    }
}

/// Parse the `YES`/`NO` enumerated values used by several attributes.
pub(super) fn parse_yes_no(value: &str) -> bool {
    value.eq_ignore_ascii_case("YES")
}

/// Parse ISO 8601 date format (e.g. `2022-11-11T18:01:44.245Z`) into the
/// corresponding unix timestamp in seconds in a float format.
///
/// A `Z` suffix, a `+hh:mm`/`-hh:mm` offset or no zone designator at all
/// (considered as UTC) are all accepted.
pub fn parse_iso_8601_date(value: &str) -> Option<f64> {
    let value = value.trim();
    let t_idx = value.find(['T', 't'])?;
    let (date, time) = (&value[..t_idx], &value[t_idx + 1..]);

    let mut date_parts = date.splitn(3, '-');
    let year = date_parts.next()?.parse::<i64>().ok()?;
    let month = date_parts.next()?.parse::<u32>().ok()?;
    let day = date_parts.next()?.parse::<u32>().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let (clock, zone_offset) = split_zone(time)?;
    let mut clock_parts = clock.splitn(3, ':');
    let hours = clock_parts.next()?.parse::<u32>().ok()?;
    let minutes = clock_parts.next()?.parse::<u32>().ok()?;
    let seconds = match clock_parts.next() {
        Some(s) => s.replace(',', ".").parse::<f64>().ok()?,
        None => 0.,
    };
    if hours > 24 || minutes > 59 || !(0. ..61.).contains(&seconds) {
        return None;
    }

    let days = days_from_civil(year, month, day);
    let result = (days * 86400 + i64::from(hours) * 3600 + i64::from(minutes) * 60) as f64
        + seconds
        - zone_offset as f64;
    Some(result)
}

/// Split the time part of a date in its clock part and its offset from UTC,
/// in seconds.
fn split_zone(time: &str) -> Option<(&str, i64)> {
    if let Some(clock) = time.strip_suffix(['Z', 'z']) {
        return Some((clock, 0));
    }
    match time.rfind(['+', '-']) {
        Some(idx) => {
            let sign = if &time[idx..idx + 1] == "-" { -1 } else { 1 };
            let zone = &time[idx + 1..];
            let (hours, minutes) = match zone.find(':') {
                Some(colon) => (&zone[..colon], &zone[colon + 1..]),
                None if zone.len() == 4 => (zone.get(..2)?, zone.get(2..)?),
                None => (zone, "0"),
            };
            let hours = hours.parse::<i64>().ok()?;
            let minutes = minutes.parse::<i64>().ok()?;
            Some((&time[..idx], sign * (hours * 3600 + minutes * 60)))
        }
        None => Some((time, 0)),
    }
}

/// Amount of days between 1970-01-01 and the given proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let year_of_era = year - era * 400;
    let month = i64::from(month);
    let shifted_month = if month > 2 { month - 3 } else { month + 9 };
    let day_of_year = (153 * shifted_month + 2) / 5 + i64::from(day) - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146097 + day_of_era - 719468
}
