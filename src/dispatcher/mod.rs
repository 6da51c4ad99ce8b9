//! The player state machine.
//!
//! The `Dispatcher` owns every piece of controller state and lives in a single
//! tokio task. The [`Player`] handle sends it commands; fetches, decoding and
//! timers run elsewhere and report back through an internal channel, which
//! the `Dispatcher` handles one message at a time.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use url::Url;

use crate::{
    bindings::{DecodeError, DecodedPicture, Renderer},
    buffer::{BufferManager, QualityKey},
    config::PlayerConfig,
    error::HlsResult,
    events::EventBus,
    loader::ContentLoader,
    parser::Playlist,
};

mod api;
mod core;
mod decode;
mod event_listeners;

pub use api::Player;
use decode::DecodeWorker;

/// State the player is in, as observed from the outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing was ever loaded.
    Inited,

    /// The first playlist of a content is being loaded.
    LoadingNewMovie,

    /// A playlist was loaded. Also the state the player is left in by `stop`.
    PlaylistLoaded,

    /// The media playlist to play is known, playback is being set up.
    StartLoadingMovie,

    /// Playing, segments being preloaded in the loader's cache.
    PlayingWithPreload,

    PlayingWithoutPreload,

    /// The bandwidth estimate designates another variant, whose media playlist
    /// is being loaded.
    BandwidthChanged,

    /// The other variant's media playlist is loaded, a quality switch is
    /// underway.
    QualityChangeNeeded,

    ErrorLoadingPlaylist,
    ErrorLoadingSegments,
}

/// Snapshot of what a UI would display, published after each change.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackStatus {
    pub state: PlayerState,

    /// Playback clock, in seconds.
    pub current_time: f64,

    pub is_playing: bool,
    pub playback_rate: f64,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            state: PlayerState::Inited,
            current_time: 0.,
            is_playing: false,
            playback_rate: 1.,
        }
    }
}

/// Orders sent by the [`Player`] handle.
#[derive(Clone, Debug)]
pub(crate) enum Command {
    LoadMovie(String),
    Play,
    Pause,
    Stop,
    Seek(f64),
    SetPlaybackRate(f64),
    SetPreloadSettings { enabled: bool, min_duration: f64 },
    SetBufferSizes { max: f64, min: f64 },
    ReleaseBufferSizes,
}

/// Why a playlist was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PlaylistPurpose {
    /// The URL given to `load_movie`, master or media.
    Root,

    /// Media playlist of the variant initially chosen from a master playlist.
    Media(QualityKey),

    /// Media playlist of a variant we're switching to.
    Switch(QualityKey),

    /// New version of the active media playlist.
    Refresh(QualityKey),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerReason {
    /// Time to give the next segment to the decoder.
    NextPull,

    /// Time to fetch the active media playlist again.
    PlaylistRefresh,

    /// A segment request failed, time to try fetching segments again.
    SegmentRetry,
}

/// Completion of something the `Dispatcher` started.
#[derive(Debug)]
pub(crate) enum InternalEvent {
    PlaylistLoaded {
        generation: u64,
        purpose: PlaylistPurpose,
        url: Url,
        result: HlsResult<Playlist>,
    },
    SegmentLoaded {
        generation: u64,
        quality: QualityKey,
        index: u64,
        duration: f64,
        result: HlsResult<Bytes>,
    },
    PreloadDone {
        generation: u64,
        result: HlsResult<usize>,
    },
    Decoded {
        epoch: u64,
        index: u64,
        duration: f64,
        result: Result<Vec<DecodedPicture>, DecodeError>,
    },
    TimerEnded(TimerId, TimerReason),
}

/// A pending timer. Dropping it does not cancel it, `Dispatcher::cancel_timer`
/// does.
struct Timer {
    id: TimerId,
    handle: JoinHandle<()>,
}

/// Media playlist currently played.
struct MediaState {
    quality: QualityKey,
    url: Url,
    playlist: Playlist,
}

/// The loaded content.
#[derive(Default)]
struct ContentState {
    /// `None` when the content URL directly points to a media playlist.
    master: Option<Playlist>,

    /// Quality of each variant of `master`, in the same order.
    qualities: Vec<QualityKey>,

    media: Option<MediaState>,

    /// Variant whose media playlist is being loaded to switch to it.
    switching_to: Option<QualityKey>,
}

pub(crate) struct Dispatcher {
    config: PlayerConfig,

    state: PlayerState,

    loader: Arc<ContentLoader>,
    buffer: Arc<BufferManager>,
    events: EventBus,
    renderer: Arc<dyn Renderer>,
    decoder: DecodeWorker,

    /// Sender side of the channel on which every completion is reported.
    internal_tx: mpsc::UnboundedSender<InternalEvent>,

    status_tx: watch::Sender<PlaybackStatus>,

    content: Option<ContentState>,

    /// Incremented each time a new content is loaded. Completions from a
    /// previous generation are ignored.
    generation: u64,

    /// Incremented on each stop and seek. Decoded output from a previous epoch
    /// is not presented.
    epoch: u64,

    /// Segment requests pending, with their duration.
    in_flight: HashMap<(QualityKey, u64), f64>,

    /// Playback clock, in seconds.
    playback_time: f64,
    playback_rate: f64,
    playing: bool,

    /// A segment was given to the decoder and its output is awaited, even if
    /// a stop or seek happened since. At most one segment is in the decoder.
    decoding: bool,

    /// A pull found the buffer empty: pull again as soon as a segment arrives.
    waiting_for_segment: bool,

    /// `false` after a stop, until playback is asked for again.
    fetching_enabled: bool,

    /// Segments are being preloaded. Other segment requests wait for it.
    preloading: bool,

    pull_timer: Option<Timer>,
    refresh_timer: Option<Timer>,
    retry_timer: Option<Timer>,
    next_timer_id: u64,
}
