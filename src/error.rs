use thiserror::Error;

use crate::bindings::{DecodeError, FetchError};

pub type HlsResult<T> = Result<T, HlsError>;

/// Failure of `parser::parse`.
///
/// Unrecognized or malformed lines are never an error: they are skipped with a
/// log message. The only way a playlist fails to parse is if it is not one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("The playlist does not start with the #EXTM3U marker")]
    MissingHeader,
}

/// Every error the loading and playback layers may produce.
#[derive(Error, Debug)]
pub enum HlsError {
    #[error("Invalid URL `{0}`")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    Network(#[from] FetchError),

    #[error("No data received from `{0}`")]
    NoDataReceived(String),

    #[error("Playlist could not be parsed: {0}")]
    Parse(#[from] ParseError),

    #[error("Playlist data is not valid UTF-8")]
    NotUtf8,

    #[error("Segment could not be decoded: {0}")]
    Decode(#[from] DecodeError),

    #[error("No variant can be selected in this playlist")]
    NoSuitableVariant,

    #[error("Segment {index} was never downloaded for quality {quality}")]
    MissingDownloadedSegment { quality: String, index: u64 },
}
