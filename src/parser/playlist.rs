use std::collections::HashMap;

use tokio::time::Instant;
use url::Url;

use super::{media_tag::MediaGroup, utils::ByteRange, variant_stream::Variant};

/// Whether a playlist lists variants or segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaylistKind {
    /// Also called "Multivariant Playlist": lists variant streams.
    Master,
    /// Lists the segments of a single rendition.
    Media,
}

/// How the content described by a playlist evolves over time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// The playlist is complete and won't change.
    Vod,
    /// Segments may be appended, never removed.
    Event,
    /// Segments may be appended and removed from the start.
    Live,
}

/// Structure representing one `.m3u8` document, either a master or a media
/// playlist.
#[derive(Clone, Debug)]
pub struct Playlist {
    pub kind: PlaylistKind,

    /// Value of `EXT-X-VERSION`.
    pub version: Option<u32>,

    /// Set by `EXT-X-INDEPENDENT-SEGMENTS`.
    pub independent_segments: bool,

    /// Preferred start position, from `EXT-X-START`.
    pub start: Option<StartOffset>,

    pub stream_type: StreamType,

    /// Variant streams, in declaration order. Only filled for `Master`
    /// playlists.
    pub variants: Vec<Variant>,

    /// Media segments, in declaration order. Only filled for `Media`
    /// playlists.
    pub segments: Vec<Segment>,

    /// Value of `EXT-X-TARGETDURATION`, in seconds.
    pub target_duration: Option<u32>,

    /// Sequence number of the first segment in `segments`.
    pub media_sequence: u64,

    pub discontinuity_sequence: u64,

    /// `true` if an `EXT-X-ENDLIST` tag was encountered, meaning that no
    /// segment will be added anymore.
    pub end_list: bool,

    pub i_frames_only: bool,

    /// `EXT-X-MEDIA` renditions, indexed by their `TYPE`.
    pub media_groups: HashMap<String, Vec<MediaGroup>>,

    /// Time at which the playlist was fetched and parsed.
    /// `None` for playlists which were parsed but not loaded.
    pub created_at: Option<Instant>,

    /// Final URL the playlist was fetched from. `None` when not loaded.
    pub url: Option<Url>,
}

/// Offset at which playback should start, from `EXT-X-START`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StartOffset {
    /// In seconds. A negative value is an offset from the end of the playlist.
    pub time_offset: f64,
    pub precise: bool,
}

/// One fetchable media chunk of a media playlist.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// Url of the segment, absolute once its playlist went through the
    /// `ContentLoader`.
    pub url: String,

    /// Duration in seconds, as declared by `EXTINF`.
    pub duration: f64,

    /// Optional title following the duration in `EXTINF`.
    pub title: Option<String>,

    pub byte_range: Option<ByteRange>,

    /// `true` if an `EXT-X-DISCONTINUITY` precedes this segment.
    pub discontinuity: bool,

    /// Encryption metadata. Parsed, not acted upon.
    pub key: Option<Key>,

    /// Initialization segment needed to decode this segment.
    pub map: Option<InitSegment>,

    /// Unix timestamp, in seconds, of the segment's first sample.
    pub program_date_time: Option<f64>,

    pub date_range: Option<DateRange>,
}

/// Data from an `EXT-X-KEY` tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    pub method: String,
    pub url: Option<String>,
    pub iv: Option<String>,
    pub key_format: Option<String>,
    pub key_format_versions: Option<String>,
}

/// Data from an `EXT-X-MAP` tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitSegment {
    pub url: String,
    pub byte_range: Option<ByteRange>,
}

/// Data from an `EXT-X-DATERANGE` tag.
#[derive(Clone, Debug, PartialEq)]
pub struct DateRange {
    pub id: Option<String>,
    pub class: Option<String>,

    /// Unix timestamp, in seconds.
    pub start_date: Option<f64>,

    /// Unix timestamp, in seconds.
    pub end_date: Option<f64>,

    pub duration: Option<f64>,
    pub planned_duration: Option<f64>,

    /// Every other attribute, by name (`X-` client attributes, `SCTE35-*`...).
    pub attributes: HashMap<String, String>,
}

impl Playlist {
    pub(super) fn empty() -> Self {
        Self {
            kind: PlaylistKind::Media,
            version: None,
            independent_segments: false,
            start: None,
            stream_type: StreamType::Live,
            variants: vec![],
            segments: vec![],
            target_duration: None,
            media_sequence: 0,
            discontinuity_sequence: 0,
            end_list: false,
            i_frames_only: false,
            media_groups: HashMap::new(),
            created_at: None,
            url: None,
        }
    }

    pub fn is_master(&self) -> bool {
        self.kind == PlaylistKind::Master
    }

    /// Sum of the durations of all segments, in seconds.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    /// Index, in `segments`, of the segment whose cumulated duration first
    /// exceeds `time`.
    ///
    /// A `time` after the end gives the last segment, a negative one the first.
    /// `None` only if there's no segment.
    pub fn segment_index_for_time(&self, time: f64) -> Option<usize> {
        if self.segments.is_empty() {
            return None;
        }
        let mut cumulated = 0.;
        for (idx, segment) in self.segments.iter().enumerate() {
            cumulated += segment.duration;
            if cumulated > time {
                return Some(idx);
            }
        }
        Some(self.segments.len() - 1)
    }

    /// Time, in seconds, at which the segment at `index` in `segments` starts.
    pub fn segment_start(&self, index: usize) -> f64 {
        self.segments.iter().take(index).map(|s| s.duration).sum()
    }

    /// Sequence number of the first segment.
    pub fn first_sequence(&self) -> u64 {
        self.media_sequence
    }

    /// Segment whose sequence number is `sequence`, if still listed.
    pub fn segment_by_sequence(&self, sequence: u64) -> Option<&Segment> {
        let pos = sequence.checked_sub(self.media_sequence)?;
        self.segments.get(usize::try_from(pos).ok()?)
    }

    /// Position, in seconds, at which playback should start according to
    /// `EXT-X-START`, clamped to the playlist's bounds.
    pub fn wanted_start(&self) -> Option<f64> {
        let start = self.start?;
        let total = self.total_duration();
        let time = if start.time_offset < 0. {
            total + start.time_offset
        } else {
            start.time_offset
        };
        Some(time.clamp(0., total))
    }
}
