use std::time::Duration;

/// Requests shorter than this are considered as having taken that long, to
/// avoid dividing by zero on cached or local responses.
const MINIMUM_SAMPLE_DURATION: Duration = Duration::from_millis(1);

/// Produce a bandwidth estimate by averaging each new sample with the previous
/// estimate: `new = (old + sample) / 2`.
///
/// Recent samples are thus favored, with older samples fading out quickly.
#[derive(Clone, Debug, Default)]
pub struct BandwidthEstimator {
    estimate: Option<f64>,
}

impl BandwidthEstimator {
    /// Creates a new `BandwidthEstimator`, with no estimate yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the `BandwidthEstimator` a new request's metrics: the amount of
    /// bytes received and the time it took to receive them.
    ///
    /// Returns the sample computed from them, in bits per second.
    pub fn add_sample(&mut self, size_bytes: usize, duration: Duration) -> f64 {
        let duration = duration.max(MINIMUM_SAMPLE_DURATION);
        let sample = (size_bytes as f64) * 8. / duration.as_secs_f64();
        self.estimate = Some(match self.estimate {
            Some(old) => (old + sample) / 2.,
            None => sample,
        });
        sample
    }

    /// Get the current estimate, in bits per second.
    ///
    /// Returns `0.` if no sample was added yet.
    pub fn get_estimate(&self) -> f64 {
        self.estimate.unwrap_or(0.)
    }

    /// Returns `true` once at least one sample was added.
    pub fn has_estimate(&self) -> bool {
        self.estimate.is_some()
    }
}
