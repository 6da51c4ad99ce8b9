//! Capabilities the player relies on but does not implement itself: network
//! transport, the codec and the drawing surface.
//!
//! Each one is a trait so that applications (and tests) can plug their own.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

mod http;

pub use http::HttpFetcher;

/// Result of a successful GET request.
#[derive(Clone, Debug)]
pub struct FetchResponse {
    /// Body of the response.
    pub data: Bytes,

    /// URL the data was actually served from, after redirections.
    /// Relative URLs found in a playlist are resolved against it.
    pub final_url: Url,
}

/// Request/response contract for playlists and segments.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError>;
}

/// Codec boundary.
///
/// A `Decoder` may hold native resources. It is owned by a single decoding
/// worker, which calls [`Decoder::close`] exactly once when it stops, whatever
/// the reason.
pub trait Decoder: Send {
    /// Decode one whole segment. Zero or more pictures may come out of it.
    fn decode(&mut self, data: &[u8]) -> Result<Vec<DecodedPicture>, DecodeError>;

    /// Release whatever the decoder holds. Called once, on every exit path.
    fn close(&mut self) {}
}

/// Drawing surface boundary.
///
/// `present` may be called from any thread: marshalling to the thread owning
/// the surface is up to the implementation.
pub trait Renderer: Send + Sync {
    fn present(&self, picture: DecodedPicture);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420p,
    Nv12,
    Rgba,
    Other(String),
}

/// A picture as produced by a [`Decoder`].
#[derive(Clone, Debug)]
pub struct DecodedPicture {
    pub width: u32,
    pub height: u32,

    /// One buffer per plane, in the order defined by `pixel_format`.
    pub planes: Vec<Bytes>,

    /// Stride, in bytes, of each plane in `planes`.
    pub line_sizes: Vec<usize>,

    /// Presentation timestamp, in seconds.
    pub presentation_timestamp: f64,

    pub pixel_format: PixelFormat,
}

/// Error returned by a [`Fetcher`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request did not finish in time.
    #[error("The request timed out")]
    Timeout,

    /// The server answered with a non-successful HTTP status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Anything else: connection refused, reset, DNS failure...
    #[error("{0}")]
    Transport(String),
}

impl FetchError {
    /// Returns `true` if that error looks temporary, in which case the request
    /// might be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Transport(_) => true,
            FetchError::Status(x) => *x == 404 || *x == 412 || *x >= 500,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Decoding failed: {0}")]
    DecodeFailed(String),
}
