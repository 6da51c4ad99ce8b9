use std::time::Duration;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(300);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(3000);

/// Inner configuration on which the `ContentLoader` relies.
#[derive(Clone, Debug)]
pub struct LoaderConfiguration {
    /// Timeout used for playlist requests, master and media alike.
    ///
    /// If that timeout is exceeded, the corresponding request will fail.
    /// `None` to disable.
    pub playlist_request_timeout: Option<Duration>,

    /// Timeout used for segment requests.
    ///
    /// If that timeout is exceeded, the corresponding request will fail.
    /// `None` to disable.
    pub segment_request_timeout: Option<Duration>,

    /// Amount of times a failed playlist request might be retried on errors
    /// that seem temporary: `1` meaning it will be retried once, `2` twice, `0`
    /// never retried etc.
    pub playlist_max_retry: u32,

    /// Amount of times a failed segment request might be retried on errors
    /// that seem temporary.
    pub segment_max_retry: u32,

    /// When a request is retried, a delay is awaited to avoid overloading the
    /// server. That delay then grows exponentially the more the request has to
    /// be retried.
    ///
    /// This is roughly the initial delay.
    pub backoff_base: Duration,

    /// This is roughly the maximum delay a retried request waits for.
    pub backoff_max: Duration,
}

impl Default for LoaderConfiguration {
    fn default() -> Self {
        Self {
            playlist_request_timeout: Some(Duration::from_secs(10)),
            segment_request_timeout: Some(Duration::from_secs(30)),
            playlist_max_retry: 3,
            segment_max_retry: 3,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

/// Segment preloading toggle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreloadSettings {
    /// When `true`, fetched segments are also kept in the loader's cache.
    pub enabled: bool,

    /// Cumulated duration of segments, in seconds, to fetch ahead of playback
    /// when preloading.
    pub min_duration: f64,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            min_duration: 0.,
        }
    }
}
