use crate::parser::Variant;

mod bandwidth_estimator;

pub use bandwidth_estimator::BandwidthEstimator;

/// Select the variant which should be played for the given bandwidth budget,
/// in bits per second.
///
/// This is the variant with the highest declared bandwidth which does not
/// exceed `bandwidth` (the first one declared if several are equal). If all
/// variants exceed it, the one with the lowest bandwidth is returned instead so
/// that playback is always possible.
///
/// Returns `None` only if `variants` is empty.
pub fn best_variant(variants: &[Variant], bandwidth: f64) -> Option<(usize, &Variant)> {
    let mut best: Option<(usize, &Variant)> = None;
    for (idx, variant) in variants.iter().enumerate() {
        if variant.bandwidth as f64 > bandwidth {
            continue;
        }
        match best {
            Some((_, b)) if b.bandwidth >= variant.bandwidth => {}
            _ => best = Some((idx, variant)),
        }
    }
    best.or_else(|| lowest_variant(variants))
}

/// Variant with the lowest declared bandwidth, the first one declared if
/// several are equal.
pub fn lowest_variant(variants: &[Variant]) -> Option<(usize, &Variant)> {
    let mut lowest: Option<(usize, &Variant)> = None;
    for (idx, variant) in variants.iter().enumerate() {
        match lowest {
            Some((_, l)) if l.bandwidth <= variant.bandwidth => {}
            _ => lowest = Some((idx, variant)),
        }
    }
    lowest
}
