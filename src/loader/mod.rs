//! Network side of the player: playlist and segment loading, bandwidth
//! estimation and segment caching.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    adaptive::{self, BandwidthEstimator},
    bindings::{FetchError, FetchResponse, Fetcher},
    error::{HlsError, HlsResult},
    events::{EventBus, LoaderEvent},
    parser::{self, Playlist, Segment, Variant},
    utils::url::{is_absolute, parse_absolute, resolve},
};

pub mod configuration;

use configuration::{LoaderConfiguration, PreloadSettings};

/// Fetches playlists and segments through a [`Fetcher`], measuring each
/// request to maintain a single rolling bandwidth estimate.
///
/// A `ContentLoader` is meant to be shared (`Arc`) between concurrent loading
/// tasks: all its methods take `&self`.
pub struct ContentLoader {
    fetcher: Arc<dyn Fetcher>,
    config: LoaderConfiguration,
    events: EventBus,
    inner: Mutex<LoaderState>,
}

struct LoaderState {
    estimator: BandwidthEstimator,

    /// Segment data, by absolute URL. Only filled when preloading is enabled.
    cache: HashMap<String, Bytes>,

    preload: PreloadSettings,

    /// URL of the last loaded playlist, against which segment URLs which are
    /// still relative are resolved.
    base_url: Option<Url>,
}

impl ContentLoader {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: LoaderConfiguration, events: EventBus) -> Self {
        Self {
            fetcher,
            config,
            events,
            inner: Mutex::new(LoaderState {
                estimator: BandwidthEstimator::new(),
                cache: HashMap::new(),
                preload: PreloadSettings::default(),
                base_url: None,
            }),
        }
    }

    /// Load and parse the playlist at `url`.
    ///
    /// Every URL it contains is resolved against the URL the playlist was
    /// actually served from, and `created_at` is set to now.
    pub async fn load_playlist(&self, url: &Url) -> HlsResult<Playlist> {
        info!(url = %url, "Loader: Fetching playlist");
        let response = self
            .fetch_with_retry(
                url,
                self.config.playlist_request_timeout,
                self.config.playlist_max_retry,
            )
            .await?;
        let text = std::str::from_utf8(&response.data).map_err(|_| HlsError::NotUtf8)?;
        let mut playlist = parser::parse(text)?;
        resolve_playlist_urls(&mut playlist, &response.final_url);
        playlist.created_at = Some(Instant::now());
        playlist.url = Some(response.final_url.clone());
        self.inner.lock().base_url = Some(response.final_url);
        debug!(
            url = %url,
            variants = playlist.variants.len(),
            segments = playlist.segments.len(),
            "Loader: Playlist parsed"
        );
        Ok(playlist)
    }

    /// Same as `load_playlist` for an URL which has not been parsed yet.
    pub async fn load_playlist_str(&self, url: &str) -> HlsResult<Playlist> {
        let url = parse_absolute(url)?;
        self.load_playlist(&url).await
    }

    /// Load the data of `segment`.
    ///
    /// Cached data is returned right away, without any request. Otherwise the
    /// segment is fetched and, if preloading is enabled, cached.
    pub async fn load_segment(&self, segment: &Segment) -> HlsResult<Bytes> {
        let url = self.segment_url(segment)?;
        let key = url.as_str().to_owned();
        let cached = self.inner.lock().cache.get(&key).cloned();
        let data = match cached {
            Some(data) => {
                debug!(url = %url, "Loader: Segment served from cache");
                data
            }
            None => {
                debug!(url = %url, duration = segment.duration, "Loader: Fetching segment");
                let response = self
                    .fetch_with_retry(
                        &url,
                        self.config.segment_request_timeout,
                        self.config.segment_max_retry,
                    )
                    .await?;
                let mut inner = self.inner.lock();
                if inner.preload.enabled {
                    inner.cache.insert(key, response.data.clone());
                }
                response.data
            }
        };
        Ok(apply_byte_range(data, segment))
    }

    /// Fetch and cache the first segments of `playlist` until their cumulated
    /// duration reaches the configured preload duration.
    ///
    /// Does nothing if preloading is disabled. Returns the amount of segments
    /// loaded.
    pub async fn preload_segments(&self, playlist: &Playlist) -> HlsResult<usize> {
        let settings = self.preload_settings();
        if !settings.enabled {
            return Ok(0);
        }
        let mut preloaded_duration = 0.;
        let mut count = 0;
        for segment in &playlist.segments {
            if preloaded_duration >= settings.min_duration {
                break;
            }
            self.load_segment(segment).await?;
            preloaded_duration += segment.duration;
            count += 1;
        }
        info!(count, duration = preloaded_duration, "Loader: Segments preloaded");
        Ok(count)
    }

    pub fn set_preload_settings(&self, enabled: bool, min_duration: f64) {
        let mut inner = self.inner.lock();
        inner.preload = PreloadSettings {
            enabled,
            min_duration,
        };
    }

    pub fn preload_settings(&self) -> PreloadSettings {
        self.inner.lock().preload
    }

    pub fn clear_cache(&self) {
        self.inner.lock().cache.clear();
    }

    pub fn cached_segment_count(&self) -> usize {
        self.inner.lock().cache.len()
    }

    /// Current bandwidth estimate, in bits per second. `0.` before the first
    /// request.
    pub fn current_bandwidth(&self) -> f64 {
        self.inner.lock().estimator.get_estimate()
    }

    pub fn has_bandwidth_estimate(&self) -> bool {
        self.inner.lock().estimator.has_estimate()
    }

    /// Best variant of `playlist` for the given bandwidth budget, in bits per
    /// second. See `adaptive::best_variant`.
    pub fn get_best_variant<'a>(&self, playlist: &'a Playlist, bandwidth: f64) -> Option<&'a Variant> {
        adaptive::best_variant(&playlist.variants, bandwidth).map(|(_, v)| v)
    }

    fn segment_url(&self, segment: &Segment) -> HlsResult<Url> {
        if is_absolute(&segment.url) {
            return parse_absolute(&segment.url);
        }
        match self.inner.lock().base_url.as_ref() {
            Some(base) => resolve(base, &segment.url),
            None => Err(HlsError::InvalidUrl(segment.url.clone())),
        }
    }

    /// Perform a request, retrying it with an exponential backoff on errors
    /// which seem temporary.
    ///
    /// Each successful request feeds the bandwidth estimate.
    async fn fetch_with_retry(
        &self,
        url: &Url,
        timeout: Option<Duration>,
        max_retry: u32,
    ) -> HlsResult<FetchResponse> {
        let mut attempts_failed = 0;
        loop {
            let start = Instant::now();
            let result = match timeout {
                Some(t) => tokio::time::timeout(t, self.fetcher.fetch(url))
                    .await
                    .unwrap_or(Err(FetchError::Timeout)),
                None => self.fetcher.fetch(url).await,
            };
            match result {
                Ok(response) => {
                    if response.data.is_empty() {
                        return Err(HlsError::NoDataReceived(url.to_string()));
                    }
                    self.add_bandwidth_sample(response.data.len(), start.elapsed());
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempts_failed < max_retry => {
                    attempts_failed += 1;
                    let delay = get_waiting_delay(
                        attempts_failed,
                        self.config.backoff_base,
                        self.config.backoff_max,
                    );
                    info!(
                        url = %url,
                        attempt = attempts_failed,
                        delay_ms = delay.as_millis() as u64,
                        "Loader: Retrying request after error: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(url = %url, attempts = attempts_failed + 1, "Loader: Request failed: {}", err);
                    return Err(HlsError::Network(err));
                }
            }
        }
    }

    fn add_bandwidth_sample(&self, size_bytes: usize, duration: Duration) {
        let (sample, estimate) = {
            let mut inner = self.inner.lock();
            let sample = inner.estimator.add_sample(size_bytes, duration);
            (sample, inner.estimator.get_estimate())
        };
        debug!(sample, estimate, "Loader: New bandwidth sample");
        self.events
            .publish(LoaderEvent::BandwidthSample { sample, estimate });
    }
}

/// Delay to wait before retrying a request for the `retry_attempt`th time.
///
/// Grows exponentially from `base` up to `max`, with a random factor between
/// `0.7` and `1.3` applied so that clients don't retry in lockstep.
fn get_waiting_delay(retry_attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = retry_attempt.saturating_sub(1).min(31);
    let delay = base.saturating_mul(1 << exponent).min(max);
    let fuzzing_factor = rand::thread_rng().gen_range(-0.3..=0.3);
    delay.mul_f64(fuzzing_factor + 1.)
}

fn resolve_or_keep(base: &Url, reference: &mut String) {
    match resolve(base, reference) {
        Ok(url) => *reference = url.into(),
        Err(_) => warn!(uri = reference.as_str(), "Loader: Unresolvable URI"),
    }
}

fn resolve_playlist_urls(playlist: &mut Playlist, base: &Url) {
    for variant in playlist.variants.iter_mut() {
        resolve_or_keep(base, &mut variant.url);
    }
    for group in playlist.media_groups.values_mut().flatten() {
        if let Some(url) = group.url.as_mut() {
            resolve_or_keep(base, url);
        }
    }
    for segment in playlist.segments.iter_mut() {
        resolve_or_keep(base, &mut segment.url);
        if let Some(map) = segment.map.as_mut() {
            resolve_or_keep(base, &mut map.url);
        }
        if let Some(key_url) = segment.key.as_mut().and_then(|k| k.url.as_mut()) {
            resolve_or_keep(base, key_url);
        }
    }
}

/// Restrict `data` to the byte range of `segment`, when its offset is known and
/// it fits in `data`.
fn apply_byte_range(data: Bytes, segment: &Segment) -> Bytes {
    let Some(range) = segment.byte_range else {
        return data;
    };
    let Some(offset) = range.offset else {
        return data;
    };
    let (Ok(start), Ok(length)) = (usize::try_from(offset), usize::try_from(range.length)) else {
        return data;
    };
    match start.checked_add(length) {
        Some(end) if end <= data.len() => data.slice(start..end),
        _ => {
            warn!(url = segment.url.as_str(), "Loader: Byte range exceeds fetched data");
            data
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{events::Event, parser::ByteRange};

    /// Serves fixed bodies by URL, optionally failing the first requests.
    struct MockFetcher {
        bodies: HashMap<String, &'static str>,
        failures_before_success: AtomicUsize,
        failure: FetchError,
        calls: AtomicUsize,
    }

    impl MockFetcher {
        fn new(bodies: &[(&str, &'static str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(u, b)| (u.to_string(), *b))
                    .collect(),
                failures_before_success: AtomicUsize::new(0),
                failure: FetchError::Status(503),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(mut self, count: usize, failure: FetchError) -> Self {
            self.failures_before_success = AtomicUsize::new(count);
            self.failure = failure;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(self.failure.clone());
            }
            match self.bodies.get(url.as_str()) {
                Some(body) => Ok(FetchResponse {
                    data: Bytes::from_static(body.as_bytes()),
                    final_url: url.clone(),
                }),
                None => Err(FetchError::Status(403)),
            }
        }
    }

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=500\n\
        low/index.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=1000\n\
        https://other.example.com/mid.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
        #EXT-X-TARGETDURATION:6\n\
        #EXT-X-MAP:URI=\"init.mp4\"\n\
        #EXTINF:6,\n\
        seg0.ts\n\
        #EXTINF:6,\n\
        ../seg1.ts\n\
        #EXT-X-ENDLIST\n";

    fn loader(fetcher: Arc<MockFetcher>) -> ContentLoader {
        ContentLoader::new(fetcher, LoaderConfiguration::default(), EventBus::new(64))
    }

    fn segment(url: &str) -> Segment {
        Segment {
            url: url.to_owned(),
            duration: 6.,
            title: None,
            byte_range: None,
            discontinuity: false,
            key: None,
            map: None,
            program_date_time: None,
            date_range: None,
        }
    }

    #[tokio::test]
    async fn test_load_playlist_resolves_urls() {
        let fetcher = Arc::new(MockFetcher::new(&[
            ("https://example.com/content/master.m3u8", MASTER),
            ("https://example.com/content/low/index.m3u8", MEDIA),
        ]));
        let loader = loader(fetcher);
        let master = loader
            .load_playlist_str("https://example.com/content/master.m3u8")
            .await
            .unwrap();
        assert!(master.is_master());
        assert!(master.created_at.is_some());
        assert_eq!(
            master.variants[0].url,
            "https://example.com/content/low/index.m3u8"
        );
        assert_eq!(master.variants[1].url, "https://other.example.com/mid.m3u8");

        let media = loader
            .load_playlist_str(&master.variants[0].url)
            .await
            .unwrap();
        assert_eq!(
            media.segments[0].url,
            "https://example.com/content/low/seg0.ts"
        );
        assert_eq!(media.segments[1].url, "https://example.com/content/seg1.ts");
        assert_eq!(
            media.segments[0].map.as_ref().unwrap().url,
            "https://example.com/content/low/init.mp4"
        );
    }

    #[tokio::test]
    async fn test_load_playlist_errors() {
        let fetcher = Arc::new(MockFetcher::new(&[
            ("https://example.com/bad.m3u8", "not a playlist"),
            ("https://example.com/empty.m3u8", ""),
        ]));
        let loader = loader(fetcher);
        assert!(matches!(
            loader.load_playlist_str("not an url").await,
            Err(HlsError::InvalidUrl(_))
        ));
        assert!(matches!(
            loader.load_playlist_str("https://example.com/bad.m3u8").await,
            Err(HlsError::Parse(_))
        ));
        assert!(matches!(
            loader.load_playlist_str("https://example.com/empty.m3u8").await,
            Err(HlsError::NoDataReceived(_))
        ));
        assert!(matches!(
            loader.load_playlist_str("https://example.com/none.m3u8").await,
            Err(HlsError::Network(FetchError::Status(403)))
        ));
    }

    #[tokio::test]
    async fn test_bandwidth_sample_is_published() {
        let fetcher = Arc::new(MockFetcher::new(&[("https://example.com/a.ts", "data")]));
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let loader = ContentLoader::new(fetcher, LoaderConfiguration::default(), events);
        assert!(!loader.has_bandwidth_estimate());
        assert_eq!(loader.current_bandwidth(), 0.);
        loader
            .load_segment(&segment("https://example.com/a.ts"))
            .await
            .unwrap();
        assert!(loader.has_bandwidth_estimate());
        assert!(loader.current_bandwidth() > 0.);
        match rx.recv().await.unwrap() {
            Event::Loader(LoaderEvent::BandwidthSample { sample, estimate }) => {
                assert_eq!(sample, estimate);
                assert_eq!(estimate, loader.current_bandwidth());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_segment_cache_only_when_preloading() {
        let fetcher = Arc::new(MockFetcher::new(&[("https://example.com/a.ts", "data")]));
        let loader = loader(fetcher.clone());
        let seg = segment("https://example.com/a.ts");

        loader.load_segment(&seg).await.unwrap();
        loader.load_segment(&seg).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(loader.cached_segment_count(), 0);

        loader.set_preload_settings(true, 10.);
        loader.load_segment(&seg).await.unwrap();
        assert_eq!(loader.cached_segment_count(), 1);
        let data = loader.load_segment(&seg).await.unwrap();
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(&data[..], b"data");

        loader.clear_cache();
        assert_eq!(loader.cached_segment_count(), 0);
        loader.load_segment(&seg).await.unwrap();
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_sample_bandwidth() {
        let fetcher = Arc::new(MockFetcher::new(&[("https://example.com/a.ts", "data")]));
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let loader = ContentLoader::new(fetcher, LoaderConfiguration::default(), events);
        loader.set_preload_settings(true, 10.);
        let seg = segment("https://example.com/a.ts");
        loader.load_segment(&seg).await.unwrap();
        loader.load_segment(&seg).await.unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relative_segment_needs_base() {
        let fetcher = Arc::new(MockFetcher::new(&[
            ("https://example.com/live/index.m3u8", MEDIA),
            ("https://example.com/live/rel.ts", "data"),
        ]));
        let loader = loader(fetcher);
        assert!(matches!(
            loader.load_segment(&segment("rel.ts")).await,
            Err(HlsError::InvalidUrl(_))
        ));
        loader
            .load_playlist_str("https://example.com/live/index.m3u8")
            .await
            .unwrap();
        assert!(loader.load_segment(&segment("rel.ts")).await.is_ok());
    }

    #[tokio::test]
    async fn test_byte_range_is_applied() {
        let fetcher = Arc::new(MockFetcher::new(&[(
            "https://example.com/main.mp4",
            "0123456789",
        )]));
        let loader = loader(fetcher);
        let mut seg = segment("https://example.com/main.mp4");
        seg.byte_range = Some(ByteRange {
            length: 4,
            offset: Some(3),
        });
        assert_eq!(&loader.load_segment(&seg).await.unwrap()[..], b"3456");
        seg.byte_range = Some(ByteRange {
            length: 40,
            offset: Some(3),
        });
        assert_eq!(loader.load_segment(&seg).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_preload_segments() {
        let fetcher = Arc::new(MockFetcher::new(&[
            ("https://example.com/v/index.m3u8", MEDIA),
            ("https://example.com/v/seg0.ts", "zero"),
            ("https://example.com/seg1.ts", "one"),
        ]));
        let loader = loader(fetcher.clone());
        let playlist = loader
            .load_playlist_str("https://example.com/v/index.m3u8")
            .await
            .unwrap();
        assert_eq!(loader.preload_segments(&playlist).await.unwrap(), 0);

        loader.set_preload_settings(true, 5.);
        assert_eq!(loader.preload_segments(&playlist).await.unwrap(), 1);
        assert_eq!(loader.cached_segment_count(), 1);

        loader.set_preload_settings(true, 12.);
        assert_eq!(loader.preload_segments(&playlist).await.unwrap(), 2);
        assert_eq!(loader.cached_segment_count(), 2);
        // playlist + seg0 + seg1, seg0 being served from cache the second time
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_temporary_errors() {
        let fetcher = Arc::new(
            MockFetcher::new(&[("https://example.com/a.ts", "data")])
                .failing(2, FetchError::Status(503)),
        );
        let loader = loader(fetcher.clone());
        let data = loader
            .load_segment(&segment("https://example.com/a.ts"))
            .await
            .unwrap();
        assert_eq!(&data[..], b"data");
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let fetcher = Arc::new(
            MockFetcher::new(&[("https://example.com/a.ts", "data")])
                .failing(10, FetchError::Timeout),
        );
        let loader = loader(fetcher.clone());
        let res = loader
            .load_segment(&segment("https://example.com/a.ts"))
            .await;
        assert!(matches!(res, Err(HlsError::Network(FetchError::Timeout))));
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn test_no_retry_on_definitive_errors() {
        let fetcher = Arc::new(
            MockFetcher::new(&[("https://example.com/a.ts", "data")])
                .failing(1, FetchError::Status(403)),
        );
        let loader = loader(fetcher.clone());
        let res = loader
            .load_segment(&segment("https://example.com/a.ts"))
            .await;
        assert!(matches!(res, Err(HlsError::Network(FetchError::Status(403)))));
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_get_waiting_delay() {
        let base = Duration::from_millis(300);
        let max = Duration::from_millis(3000);
        for _ in 0..50 {
            let first = get_waiting_delay(1, base, max);
            assert!(first >= Duration::from_millis(209) && first <= Duration::from_millis(391));
            let third = get_waiting_delay(3, base, max);
            assert!(third >= Duration::from_millis(839) && third <= Duration::from_millis(1561));
            let tenth = get_waiting_delay(10, base, max);
            assert!(tenth >= Duration::from_millis(2099) && tenth <= Duration::from_millis(3901));
        }
    }

    #[test]
    fn test_get_best_variant() {
        let loader = loader(Arc::new(MockFetcher::new(&[])));
        let playlist = parser::parse(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=500\na\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nb\n#EXT-X-STREAM-INF:BANDWIDTH=2000\nc\n",
        )
        .unwrap();
        assert_eq!(
            loader.get_best_variant(&playlist, 1500.).map(|v| v.bandwidth),
            Some(1000)
        );
        assert_eq!(
            loader.get_best_variant(&playlist, 100.).map(|v| v.bandwidth),
            Some(500)
        );
    }
}
