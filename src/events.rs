//! Observability: everything worth knowing about what the player does is
//! published on an [`EventBus`] handed explicitly to each component.

use tokio::sync::broadcast;

use crate::{buffer::QualityKey, dispatcher::PlayerState};

/// Any event published on the [`EventBus`].
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Player(PlayerEvent),
    Loader(LoaderEvent),
    Buffer(BufferEvent),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerState),

    /// A variant was chosen, initially or following a bandwidth change.
    VariantSelected { quality: QualityKey, bandwidth: u64 },

    /// A playlist failed to load, even after retries.
    PlaylistLoadFailed { url: String, error: String },

    /// A segment failed to load, even after retries.
    SegmentLoadFailed { index: u64, error: String },

    DecodeFailed { index: u64, error: String },

    /// Every segment of ended content was presented.
    Ended,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoaderEvent {
    /// A request finished, giving a new throughput measurement. Both values are
    /// in bits per second.
    BandwidthSample { sample: f64, estimate: f64 },
}

/// Signals from the `BufferManager`. All of them are informational, except
/// `Final` after which no segment will be appended anymore.
#[derive(Clone, Debug, PartialEq)]
pub enum BufferEvent {
    /// The buffered duration went under the configured minimum.
    CachedTimeLow { buffered: f64, min: f64 },

    /// Appending stopped because the next segment in line is not downloaded.
    NoNextSegmentDownloaded { quality: QualityKey, index: u64 },

    /// A segment was requested but none could be given.
    NoSegment,

    /// A segment is known as downloaded but its data could not be found.
    NoDataForSegment { quality: QualityKey, index: u64 },

    /// A segment was appended to a timeline, ready to be consumed.
    SegmentPrepared {
        quality: QualityKey,
        index: u64,
        duration: f64,
    },

    /// A staged quality switch took effect.
    QualitySwitched {
        from: Option<QualityKey>,
        to: QualityKey,
    },

    /// The end of the content was reached.
    Final,
}

impl From<PlayerEvent> for Event {
    fn from(event: PlayerEvent) -> Self {
        Event::Player(event)
    }
}

impl From<LoaderEvent> for Event {
    fn from(event: LoaderEvent) -> Self {
        Event::Loader(event)
    }
}

impl From<BufferEvent> for Event {
    fn from(event: BufferEvent) -> Self {
        Event::Buffer(event)
    }
}

/// Broadcast channel shared by every component.
///
/// Publishing never blocks nor fails: without subscribers, events are dropped
/// and slow subscribers are told how many they missed.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish<E: Into<Event>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
