//! Player configuration.
//!
//! Everything has a default, `PlayerConfig::default()` gives a working player.

use std::time::Duration;

pub use crate::loader::configuration::{LoaderConfiguration, PreloadSettings};
use crate::parser::StreamType;

/// When a staged quality switch should take over the current timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchPolicy {
    /// Wait for every segment already queued in the current quality to be
    /// consumed.
    AfterQueueDrain,

    /// Switch after that many of the already-queued segments were consumed.
    /// Queued segments beyond that are dropped from the timeline (they stay
    /// downloaded).
    Immediately(usize),
}

/// How many already-consumed segments are kept around.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PastRetention {
    KeepAll,

    /// Keep the last consumed segments as long as their cumulated duration,
    /// in seconds, stays within that window.
    KeepWithin(f64),
}

#[derive(Clone, Debug)]
pub struct BufferConfiguration {
    pub switch_policy: SwitchPolicy,
    pub retention: PastRetention,

    /// If `true`, when the active quality has no segment ready, a segment with
    /// the same index already downloaded in any other quality is used instead
    /// of stalling.
    pub allow_low_quality_fallback: bool,
}

impl Default for BufferConfiguration {
    fn default() -> Self {
        Self {
            switch_policy: SwitchPolicy::AfterQueueDrain,
            retention: PastRetention::KeepWithin(60.),
            allow_low_quality_fallback: true,
        }
    }
}

/// Refresh and buffering behavior applied when a media playlist of a given
/// `StreamType` is loaded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamPolicy {
    /// Delay after which the media playlist is fetched again. `None` means
    /// never.
    pub refresh_interval: Option<Duration>,

    /// Maximum buffered duration, in seconds.
    pub max_buffer: f64,

    /// Buffered duration, in seconds, under which the buffer is considered
    /// unhealthy.
    pub min_buffer: f64,
}

#[derive(Clone, Debug)]
pub struct StreamPolicies {
    pub vod: StreamPolicy,
    pub live: StreamPolicy,
    pub event: StreamPolicy,
}

impl StreamPolicies {
    pub fn get(&self, stream_type: StreamType) -> &StreamPolicy {
        match stream_type {
            StreamType::Vod => &self.vod,
            StreamType::Live => &self.live,
            StreamType::Event => &self.event,
        }
    }
}

impl Default for StreamPolicies {
    fn default() -> Self {
        Self {
            vod: StreamPolicy {
                refresh_interval: None,
                max_buffer: 60.,
                min_buffer: 30.,
            },
            live: StreamPolicy {
                refresh_interval: Some(Duration::from_secs(30)),
                max_buffer: 30.,
                min_buffer: 10.,
            },
            event: StreamPolicy {
                refresh_interval: Some(Duration::from_secs(60)),
                max_buffer: 45.,
                min_buffer: 20.,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub buffer: BufferConfiguration,
    pub loader: LoaderConfiguration,
    pub policies: StreamPolicies,
    pub preload: PreloadSettings,

    /// Maximum amount of segments waiting to be decoded.
    pub decode_pipeline_depth: usize,

    /// Capacity of the event bus. Slow subscribers miss events past it.
    pub event_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfiguration::default(),
            loader: LoaderConfiguration::default(),
            policies: StreamPolicies::default(),
            preload: PreloadSettings::default(),
            decode_pipeline_depth: 5,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream_policies() {
        let policies = StreamPolicies::default();
        let vod = policies.get(StreamType::Vod);
        assert_eq!(vod.refresh_interval, None);
        assert_eq!((vod.max_buffer, vod.min_buffer), (60., 30.));
        let live = policies.get(StreamType::Live);
        assert_eq!(live.refresh_interval, Some(Duration::from_secs(30)));
        assert_eq!((live.max_buffer, live.min_buffer), (30., 10.));
        let event = policies.get(StreamType::Event);
        assert_eq!(event.refresh_interval, Some(Duration::from_secs(60)));
        assert_eq!((event.max_buffer, event.min_buffer), (45., 20.));
    }
}
