//! M3U8 playlist parsing.
//!
//! [`parse`] is a pure, single-pass function: it never performs any request and
//! never fails on unknown or malformed lines, which are skipped.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::ParseError;

mod attributes;
mod media_tag;
mod playlist;
mod utils;
mod variant_stream;

use attributes::AttributeList;
use utils::{parse_byte_range, parse_decimal_floating_point, parse_yes_no};

pub use media_tag::MediaGroup;
pub use playlist::{
    DateRange, InitSegment, Key, Playlist, PlaylistKind, Segment, StartOffset, StreamType,
};
pub use utils::{parse_iso_8601_date, ByteRange, Resolution};
pub use variant_stream::Variant;

const HEADER: &str = "#EXTM3U";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeclaredPlaylistType {
    Vod,
    Event,
}

/// Segment-scoped information accumulated until the URI line closing the
/// segment.
#[derive(Default)]
struct PendingSegment {
    duration: Option<f64>,
    title: Option<String>,
    byte_range: Option<ByteRange>,
    discontinuity: bool,
    program_date_time: Option<f64>,
    date_range: Option<DateRange>,
}

/// Parse the text of a master or media playlist.
///
/// Fails only if the first line is not `#EXTM3U`.
pub fn parse(text: &str) -> Result<Playlist, ParseError> {
    let mut lines = text.lines();
    let first_line = lines
        .next()
        .map(|l| l.trim_start_matches('\u{feff}').trim_end());
    if first_line != Some(HEADER) {
        return Err(ParseError::MissingHeader);
    }

    let mut playlist = Playlist::empty();
    let mut declared_type: Option<DeclaredPlaylistType> = None;

    let mut current_variant: Option<Variant> = None;
    let mut pending_segment = PendingSegment::default();
    let mut current_key: Option<Key> = None;
    let mut current_map: Option<InitSegment> = None;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("#EXT") {
            let (tag, value) = match line.find(':') {
                Some(idx) => (&line[..idx], &line[idx + 1..]),
                None => (line, ""),
            };
            match tag {
                "#EXT-X-VERSION" => match value.trim().parse::<u32>() {
                    Ok(v) => playlist.version = Some(v),
                    Err(_) => warn!(value, "Parser: Unparsable VERSION value"),
                },
                "#EXT-X-INDEPENDENT-SEGMENTS" => playlist.independent_segments = true,
                "#EXT-X-START" => {
                    let attrs = AttributeList::parse(value);
                    match attrs.get("TIME-OFFSET").and_then(|t| t.parse::<f64>().ok()) {
                        Some(time_offset) => {
                            playlist.start = Some(StartOffset {
                                time_offset,
                                precise: attrs.get("PRECISE").map_or(false, parse_yes_no),
                            })
                        }
                        None => warn!("Parser: EXT-X-START without a valid TIME-OFFSET"),
                    }
                }
                "#EXT-X-STREAM-INF" => {
                    playlist.kind = PlaylistKind::Master;
                    if current_variant.is_some() {
                        warn!("Parser: EXT-X-STREAM-INF not followed by a URI");
                    }
                    current_variant = Some(Variant::from_attributes(&AttributeList::parse(value)));
                }
                "#EXT-X-MEDIA" => match MediaGroup::from_attributes(&AttributeList::parse(value)) {
                    Some(group) => playlist
                        .media_groups
                        .entry(group.media_type.clone())
                        .or_default()
                        .push(group),
                    None => warn!("Parser: EXT-X-MEDIA without TYPE or GROUP-ID"),
                },
                "#EXT-X-TARGETDURATION" => match parse_decimal_floating_point(value) {
                    Some(d) if d >= 0. && d <= f64::from(u32::MAX) => {
                        playlist.target_duration = Some(d.ceil() as u32)
                    }
                    _ => warn!(value, "Parser: Unparsable TARGETDURATION value"),
                },
                "#EXT-X-MEDIA-SEQUENCE" => match value.trim().parse::<u64>() {
                    Ok(s) => playlist.media_sequence = s,
                    Err(_) => warn!(value, "Parser: Unparsable MEDIA-SEQUENCE value"),
                },
                "#EXT-X-DISCONTINUITY-SEQUENCE" => match value.trim().parse::<u64>() {
                    Ok(s) => playlist.discontinuity_sequence = s,
                    Err(_) => warn!(value, "Parser: Unparsable DISCONTINUITY-SEQUENCE value"),
                },
                "#EXT-X-PLAYLIST-TYPE" => match value.trim() {
                    "VOD" => declared_type = Some(DeclaredPlaylistType::Vod),
                    "EVENT" => declared_type = Some(DeclaredPlaylistType::Event),
                    x => warn!(value = x, "Parser: Unrecognized playlist type"),
                },
                "#EXT-X-ENDLIST" => playlist.end_list = true,
                "#EXT-X-I-FRAMES-ONLY" => playlist.i_frames_only = true,
                "#EXTINF" => {
                    playlist.kind = PlaylistKind::Media;
                    let duration = match parse_decimal_floating_point(value) {
                        Some(d) if d >= 0. => d,
                        _ => {
                            warn!(value, "Parser: Invalid EXTINF duration, defaulting to 0");
                            0.
                        }
                    };
                    pending_segment.duration = Some(duration);
                    pending_segment.title = value
                        .find(',')
                        .map(|idx| value[idx + 1..].trim())
                        .filter(|t| !t.is_empty())
                        .map(str::to_owned);
                }
                "#EXT-X-BYTERANGE" => match parse_byte_range(value) {
                    Some(br) => pending_segment.byte_range = Some(br),
                    None => warn!(value, "Parser: Unparsable BYTERANGE value"),
                },
                "#EXT-X-DISCONTINUITY" => pending_segment.discontinuity = true,
                "#EXT-X-KEY" => current_key = parse_key(&AttributeList::parse(value)),
                "#EXT-X-MAP" => {
                    let attrs = AttributeList::parse(value);
                    match attrs.get("URI") {
                        Some(uri) => {
                            current_map = Some(InitSegment {
                                url: uri.to_owned(),
                                byte_range: attrs.get("BYTERANGE").and_then(parse_byte_range),
                            })
                        }
                        None => warn!("Parser: EXT-X-MAP without URI"),
                    }
                }
                "#EXT-X-PROGRAM-DATE-TIME" => {
                    pending_segment.program_date_time = parse_iso_8601_date(value);
                    if pending_segment.program_date_time.is_none() {
                        warn!(value, "Parser: Unparsable PROGRAM-DATE-TIME value");
                    }
                }
                "#EXT-X-DATERANGE" => {
                    pending_segment.date_range = Some(parse_date_range(&AttributeList::parse(value)))
                }
                "#EXTM3U" => {}
                x => debug!(tag = x, "Parser: Unrecognized tag"),
            }
        } else if line.starts_with('#') {
            continue;
        } else if let Some(mut variant) = current_variant.take() {
            variant.url = line.to_owned();
            playlist.variants.push(variant);
        } else if let Some(duration) = pending_segment.duration {
            let pending = std::mem::take(&mut pending_segment);
            playlist.segments.push(Segment {
                url: line.to_owned(),
                duration,
                title: pending.title,
                byte_range: pending.byte_range,
                discontinuity: pending.discontinuity,
                key: current_key.clone(),
                map: current_map.clone(),
                program_date_time: pending.program_date_time,
                date_range: pending.date_range,
            });
        } else {
            debug!(uri = line, "Parser: URI not linked to any EXTINF or STREAM-INF, ignoring");
        }
    }

    playlist.stream_type = if playlist.end_list {
        StreamType::Vod
    } else {
        match declared_type {
            Some(DeclaredPlaylistType::Vod) => StreamType::Vod,
            Some(DeclaredPlaylistType::Event) => StreamType::Event,
            None => StreamType::Live,
        }
    };
    Ok(playlist)
}

fn parse_key(attrs: &AttributeList) -> Option<Key> {
    let method = attrs.get("METHOD")?;
    if method == "NONE" {
        return None;
    }
    Some(Key {
        method: method.to_owned(),
        url: attrs.get("URI").map(str::to_owned),
        iv: attrs.get("IV").map(str::to_owned),
        key_format: attrs.get("KEYFORMAT").map(str::to_owned),
        key_format_versions: attrs.get("KEYFORMATVERSIONS").map(str::to_owned),
    })
}

fn parse_date_range(attrs: &AttributeList) -> DateRange {
    let mut date_range = DateRange {
        id: None,
        class: None,
        start_date: None,
        end_date: None,
        duration: None,
        planned_duration: None,
        attributes: HashMap::new(),
    };
    for (name, value) in attrs.iter() {
        match name {
            "ID" => date_range.id = Some(value.to_owned()),
            "CLASS" => date_range.class = Some(value.to_owned()),
            "START-DATE" => date_range.start_date = parse_iso_8601_date(value),
            "END-DATE" => date_range.end_date = parse_iso_8601_date(value),
            "DURATION" => date_range.duration = value.parse().ok(),
            "PLANNED-DURATION" => date_range.planned_duration = value.parse().ok(),
            _ => {
                date_range
                    .attributes
                    .insert(name.to_owned(), value.to_owned());
            }
        }
    }
    date_range
}
