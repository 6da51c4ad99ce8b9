//! Adaptive HTTP Live Streaming client.
//!
//! The crate is split the same way the playback pipeline is:
//!
//!   - [`parser`] turns `.m3u8` text into a [`Playlist`].
//!   - [`loader`] fetches playlists and segments, keeps a bandwidth estimate
//!     and optionally caches segment bytes.
//!   - [`buffer`] holds downloaded segment bytes per quality and exposes the
//!     consumption timeline, including staged quality switches.
//!   - [`dispatcher`] owns the player state machine and drives everything else
//!     through the [`Player`] handle.
//!
//! Decoding and rendering are external capabilities, plugged in through the
//! traits in [`bindings`].

pub mod adaptive;
pub mod bindings;
pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod loader;
pub mod parser;
pub mod utils;

pub use bindings::{
    DecodeError, DecodedPicture, Decoder, FetchError, FetchResponse, Fetcher, HttpFetcher,
    PixelFormat, Renderer,
};
pub use buffer::{BufferManager, BufferedSegment, QualityKey};
pub use config::{BufferConfiguration, PastRetention, PlayerConfig, StreamPolicy, SwitchPolicy};
pub use dispatcher::{PlaybackStatus, Player, PlayerState};
pub use error::{HlsError, HlsResult, ParseError};
pub use events::{BufferEvent, Event, EventBus, PlayerEvent};
pub use loader::ContentLoader;
pub use parser::{parse, Playlist, PlaylistKind, Segment, StreamType, Variant};
