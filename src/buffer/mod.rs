//! Segment buffering between the network and the decoder.
//!
//! The [`BufferManager`] keeps every downloaded segment, per quality, and
//! exposes a consumption timeline in strict index order. Quality switches are
//! staged on a second timeline which takes over once the segments already
//! queued in the current quality are consumed.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::{
    config::{BufferConfiguration, PastRetention, StreamPolicy, SwitchPolicy},
    error::{HlsError, HlsResult},
    events::{BufferEvent, EventBus},
};

mod store;
mod timeline;

use store::{DataHandle, SegmentStore};
use timeline::Timeline;

/// Tolerance used when comparing cumulated durations, which are sums of floats.
const DURATION_EPSILON: f64 = 1e-6;

/// Identifies one rendition of the content: the index of its variant in the
/// master playlist and its rank when variants are sorted by bandwidth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualityKey {
    pub variant_index: usize,
    pub quality_rank: usize,
}

impl QualityKey {
    pub fn new(variant_index: usize, quality_rank: usize) -> Self {
        Self {
            variant_index,
            quality_rank,
        }
    }
}

impl fmt::Display for QualityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.variant_index, self.quality_rank)
    }
}

/// A segment ready to be decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferedSegment {
    /// Quality the data comes from. It may differ from the active quality for
    /// segments given as a low-quality fallback.
    pub quality: QualityKey,

    /// Sequence number of the segment.
    pub index: u64,

    pub data: Bytes,

    /// Duration in seconds.
    pub duration: f64,
}

/// What is known about a downloaded segment. Its data lives in the
/// `SegmentStore`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SegmentInfo {
    index: u64,
    handle: DataHandle,
    duration: f64,
}

/// Bounds of a quality's media playlist.
#[derive(Clone, Copy, Debug)]
struct LineInfo {
    first_sequence: u64,
    segment_count: u64,
    ended: bool,
}

impl LineInfo {
    /// Sequence number following the last segment.
    fn end(&self) -> u64 {
        self.first_sequence + self.segment_count
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct BufferSizes {
    max: f64,
    min: f64,
}

/// Buffer shared between segment loading tasks, which add segments, and the
/// playback loop, which consumes them.
///
/// Every method takes `&self`: the whole state lives behind a single lock so
/// that concurrent additions can't break the timeline ordering.
pub struct BufferManager {
    config: BufferConfiguration,
    events: EventBus,
    state: Mutex<BufferState>,
}

struct BufferState {
    /// Everything downloaded this session, by quality then index.
    downloaded: HashMap<QualityKey, BTreeMap<u64, SegmentInfo>>,

    store: SegmentStore,

    lines: HashMap<QualityKey, LineInfo>,

    /// Ready-to-consume segments of the active quality.
    current: Timeline,

    /// Segments of the quality we're switching to.
    next: Timeline,

    /// Consumed segments, trimmed according to the retention policy.
    past: Timeline,

    current_quality: Option<QualityKey>,
    pending_quality: Option<QualityKey>,

    /// Amount of `get_next_segment` calls before the staged switch activates.
    switch_after: Option<usize>,

    /// Index of the next segment to append to `current`.
    current_index: u64,

    /// Index at which the staged timeline starts.
    staged_from: u64,

    /// Index of the next segment to append to `next`.
    next_index: u64,

    default_sizes: BufferSizes,
    sizes_override: Option<BufferSizes>,

    /// No segment will be appended anymore.
    is_final: bool,
    final_signaled: bool,
}

impl BufferManager {
    pub fn new(config: BufferConfiguration, events: EventBus) -> Self {
        Self {
            config,
            events,
            state: Mutex::new(BufferState::new()),
        }
    }

    /// Store a downloaded segment and append whatever can now be appended to
    /// the timelines.
    ///
    /// If `quality` differs from the active one, a quality switch is staged,
    /// unless `is_low_quality_fallback` is set, in which case the segment is
    /// only stored.
    pub fn add_segment(
        &self,
        quality: QualityKey,
        index: u64,
        data: Bytes,
        duration: f64,
        is_low_quality_fallback: bool,
    ) {
        let mut state = self.state.lock();
        state.store_downloaded(quality, index, data, duration);
        if !is_low_quality_fallback {
            match (state.current_quality, state.pending_quality) {
                (None, _) => {
                    info!(quality = %quality, "Buffer: Initial quality");
                    state.current_quality = Some(quality);
                }
                (Some(current), None) if current != quality => {
                    state.stage_switch(quality, self.config.switch_policy);
                }
                (Some(current), Some(_)) if current == quality => {
                    info!(quality = %quality, "Buffer: Cancelling staged quality switch");
                    state.cancel_switch();
                }
                (Some(_), Some(pending)) if pending != quality => {
                    info!(quality = %quality, "Buffer: Replacing staged quality switch");
                    state.pending_quality = Some(quality);
                    state.next.clear();
                    state.next_index = state.staged_from;
                    state.is_final = false;
                }
                _ => {}
            }
        }
        state.top_up(&self.events);
    }

    /// Store a downloaded segment without ever staging a quality switch.
    pub fn store_segment(&self, quality: QualityKey, index: u64, data: Bytes, duration: f64) {
        self.add_segment(quality, index, data, duration, true)
    }

    /// Pop the next segment to decode.
    ///
    /// Returns `None` if there's nothing to play for now, or anymore if
    /// `is_final` returns `true`.
    pub fn get_next_segment(&self) -> Option<BufferedSegment> {
        let mut state = self.state.lock();
        let switch_after = state.switch_after;
        match switch_after {
            Some(0) => state.activate_switch(&self.events),
            Some(n) => state.switch_after = Some(n - 1),
            None => {}
        }
        if state.current.is_empty() {
            state.top_up(&self.events);
        }
        let segment = match state.current.pop_front() {
            Some(segment) => Some(segment),
            None if state.is_final => return None,
            None if self.config.allow_low_quality_fallback => {
                state.low_quality_fallback(&self.events)
            }
            None => None,
        };
        let Some(segment) = segment else {
            debug!(index = state.current_index, "Buffer: No segment to give");
            self.events.publish(BufferEvent::NoSegment);
            return None;
        };

        state.past.push_back(segment.clone());
        if let PastRetention::KeepWithin(window) = self.config.retention {
            state.past.trim_to(window);
        }
        state.top_up(&self.events);

        let buffered = state.current.duration();
        let min = state.sizes().min;
        if !state.is_final && buffered < min {
            debug!(buffered, min, "Buffer: Cached time low");
            self.events
                .publish(BufferEvent::CachedTimeLow { buffered, min });
        }
        Some(segment)
    }

    /// Drop every timeline. Downloaded segments are kept and a staged quality
    /// becomes the active one.
    ///
    /// The next segment given is the one which would have been given before
    /// clearing.
    pub fn clear_buffer(&self) {
        let mut state = self.state.lock();
        state.clear_timelines();
    }

    /// Restart consumption at `index`.
    pub fn seek_to(&self, index: u64) {
        let mut state = self.state.lock();
        state.clear_timelines();
        state.current_index = index;
        state.staged_from = index;
        state.next_index = index;
        state.top_up(&self.events);
    }

    /// Forget everything, downloaded segments included. Explicit buffer sizes
    /// are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let sizes_override = state.sizes_override;
        let default_sizes = state.default_sizes;
        *state = BufferState::new();
        state.sizes_override = sizes_override;
        state.default_sizes = default_sizes;
    }

    /// Declare the bounds of the media playlist of `quality`.
    ///
    /// A line which is not `ended` may grow later on and never makes the buffer
    /// final.
    pub fn register_line(&self, quality: QualityKey, first_sequence: u64, segment_count: u64, ended: bool) {
        let mut state = self.state.lock();
        state.lines.insert(
            quality,
            LineInfo {
                first_sequence,
                segment_count,
                ended,
            },
        );
        state.top_up(&self.events);
    }

    /// Apply the buffer sizes of a stream policy, unless explicit sizes were
    /// set through `set_buffer_sizes`.
    pub fn apply_stream_policy(&self, policy: &StreamPolicy) {
        self.apply_default_sizes(policy.max_buffer, policy.min_buffer);
    }

    pub fn apply_default_sizes(&self, max: f64, min: f64) {
        let mut state = self.state.lock();
        state.default_sizes = BufferSizes { max, min };
        state.top_up(&self.events);
    }

    /// Set explicit buffer sizes, in seconds, which take precedence over the
    /// defaults until `release_buffer_sizes` is called.
    pub fn set_buffer_sizes(&self, max: f64, min: f64) {
        let mut state = self.state.lock();
        state.sizes_override = Some(BufferSizes { max, min });
        state.top_up(&self.events);
    }

    pub fn release_buffer_sizes(&self) {
        let mut state = self.state.lock();
        state.sizes_override = None;
        state.top_up(&self.events);
    }

    pub fn max_buffer(&self) -> f64 {
        self.state.lock().sizes().max
    }

    pub fn min_buffer(&self) -> f64 {
        self.state.lock().sizes().min
    }

    /// `true` if the active timeline holds at least the minimum duration.
    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock();
        state.current.duration() >= state.sizes().min
    }

    /// Duration, in seconds, of the active and staged timelines.
    pub fn buffered_duration(&self) -> f64 {
        let state = self.state.lock();
        state.current.duration() + state.next.duration()
    }

    pub fn past_duration(&self) -> f64 {
        self.state.lock().past.duration()
    }

    /// Amount of segments in the active timeline.
    pub fn queued_count(&self) -> usize {
        self.state.lock().current.len()
    }

    pub fn is_final(&self) -> bool {
        self.state.lock().is_final
    }

    pub fn current_quality(&self) -> Option<QualityKey> {
        self.state.lock().current_quality
    }

    pub fn pending_quality(&self) -> Option<QualityKey> {
        self.state.lock().pending_quality
    }

    pub fn is_downloaded(&self, quality: QualityKey, index: u64) -> bool {
        self.state
            .lock()
            .downloaded
            .get(&quality)
            .map_or(false, |d| d.contains_key(&index))
    }

    /// A downloaded segment, whether it is in a timeline or not.
    pub fn downloaded_segment(&self, quality: QualityKey, index: u64) -> HlsResult<BufferedSegment> {
        let state = self.state.lock();
        let missing = || HlsError::MissingDownloadedSegment {
            quality: quality.to_string(),
            index,
        };
        let info = state
            .downloaded
            .get(&quality)
            .and_then(|d| d.get(&index))
            .ok_or_else(missing)?;
        let data = state.store.get(info.handle).ok_or_else(missing)?;
        Ok(BufferedSegment {
            quality,
            index,
            data,
            duration: info.duration,
        })
    }

    /// Index at which segments of a quality which is neither active nor staged
    /// would start being used if a switch to it was staged now.
    pub fn planned_switch_index(&self) -> u64 {
        self.state.lock().planned_switch_index(self.config.switch_policy)
    }

    /// Index of the next segment of `quality` needed by the timelines.
    pub fn next_needed_index(&self, quality: QualityKey) -> u64 {
        self.state
            .lock()
            .next_needed_index(quality, self.config.switch_policy)
    }

    /// Duration, in seconds, of the segments of `quality` already downloaded
    /// contiguously from `next_needed_index`, which are waiting for room in the
    /// timelines.
    pub fn ahead_duration(&self, quality: QualityKey) -> f64 {
        let state = self.state.lock();
        let mut index = state.next_needed_index(quality, self.config.switch_policy);
        let mut total = 0.;
        if let Some(downloaded) = state.downloaded.get(&quality) {
            while let Some(info) = downloaded.get(&index) {
                total += info.duration;
                index += 1;
            }
        }
        total
    }

    /// Amount of distinct segment data and their total size in bytes.
    pub fn stored_data(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.store.len(), state.store.total_bytes())
    }
}

impl BufferState {
    fn new() -> Self {
        Self {
            downloaded: HashMap::new(),
            store: SegmentStore::default(),
            lines: HashMap::new(),
            current: Timeline::default(),
            next: Timeline::default(),
            past: Timeline::default(),
            current_quality: None,
            pending_quality: None,
            switch_after: None,
            current_index: 0,
            staged_from: 0,
            next_index: 0,
            default_sizes: BufferSizes { max: 60., min: 30. },
            sizes_override: None,
            is_final: false,
            final_signaled: false,
        }
    }

    fn sizes(&self) -> BufferSizes {
        self.sizes_override.unwrap_or(self.default_sizes)
    }

    fn store_downloaded(&mut self, quality: QualityKey, index: u64, data: Bytes, duration: f64) {
        let handle = self.store.insert(data);
        trace!(quality = %quality, index, duration, "Buffer: Segment stored");
        let replaced = self.downloaded.entry(quality).or_default().insert(
            index,
            SegmentInfo {
                index,
                handle,
                duration,
            },
        );
        if let Some(old) = replaced {
            self.store.release(old.handle);
        }
    }

    fn planned_switch_index(&self, policy: SwitchPolicy) -> u64 {
        if self.pending_quality.is_some() {
            return self.staged_from;
        }
        let drained_count = match policy {
            SwitchPolicy::AfterQueueDrain => self.current.len(),
            SwitchPolicy::Immediately(n) => n.min(self.current.len()),
        };
        self.current
            .get(drained_count)
            .map_or(self.current_index, |s| s.index)
    }

    fn next_needed_index(&self, quality: QualityKey, policy: SwitchPolicy) -> u64 {
        if self.pending_quality == Some(quality) {
            self.next_index
        } else if self.current_quality.is_none() || self.current_quality == Some(quality) {
            self.current_index
        } else {
            self.planned_switch_index(policy)
        }
    }

    fn stage_switch(&mut self, quality: QualityKey, policy: SwitchPolicy) {
        let drained_count = match policy {
            SwitchPolicy::AfterQueueDrain => self.current.len(),
            SwitchPolicy::Immediately(n) => n.min(self.current.len()),
        };
        self.staged_from = self.planned_switch_index(policy);
        self.next_index = self.staged_from;
        self.next.clear();
        self.pending_quality = Some(quality);
        self.switch_after = Some(drained_count);
        // The staged line decides again whether the end was reached.
        self.is_final = false;
        info!(
            quality = %quality,
            after = drained_count,
            from_index = self.staged_from,
            "Buffer: Quality switch staged"
        );
    }

    fn cancel_switch(&mut self) {
        self.pending_quality = None;
        self.switch_after = None;
        self.next.clear();
        self.is_final = false;
    }

    fn activate_switch(&mut self, events: &EventBus) {
        let Some(to) = self.pending_quality.take() else {
            self.switch_after = None;
            return;
        };
        let from = self.current_quality;
        self.current = std::mem::take(&mut self.next);
        self.current_quality = Some(to);
        self.current_index = self.next_index;
        self.switch_after = None;
        info!(quality = %to, "Buffer: Quality switch activated");
        events.publish(BufferEvent::QualitySwitched { from, to });
    }

    fn clear_timelines(&mut self) {
        let head = match (self.current.front(), self.next.front()) {
            (Some(s), _) => s.index,
            (None, Some(s)) => s.index,
            (None, None) if self.pending_quality.is_some() => self.staged_from,
            (None, None) => self.current_index,
        };
        self.current.clear();
        self.next.clear();
        self.past.clear();
        if let Some(pending) = self.pending_quality.take() {
            self.current_quality = Some(pending);
        }
        self.switch_after = None;
        self.current_index = head;
        self.staged_from = head;
        self.next_index = head;
        self.is_final = false;
        self.final_signaled = false;
    }

    /// Look for the segment at `current_index` in every quality and take the
    /// shortest one.
    fn low_quality_fallback(&mut self, events: &EventBus) -> Option<BufferedSegment> {
        let index = self.current_index;
        let mut qualities: Vec<QualityKey> = self.downloaded.keys().copied().collect();
        qualities.sort();
        let mut best: Option<(QualityKey, SegmentInfo)> = None;
        for quality in qualities {
            let Some(info) = self.downloaded.get(&quality).and_then(|d| d.get(&index)) else {
                continue;
            };
            if best.map_or(true, |(_, b)| info.duration < b.duration) {
                best = Some((quality, *info));
            }
        }
        let (quality, info) = best?;
        let Some(data) = self.store.get(info.handle) else {
            warn!(quality = %quality, index, "Buffer: No data for downloaded segment");
            events.publish(BufferEvent::NoDataForSegment { quality, index });
            return None;
        };
        info!(quality = %quality, index = info.index, "Buffer: Using low quality fallback");
        self.current_index += 1;
        Some(BufferedSegment {
            quality,
            index,
            data,
            duration: info.duration,
        })
    }

    /// Append downloaded segments, in order, to the staged timeline if a
    /// switch is staged or to the current one otherwise, until the maximum
    /// buffer size is reached or a segment is missing.
    fn top_up(&mut self, events: &EventBus) {
        loop {
            if self.is_final {
                return;
            }
            let staging = self.pending_quality.is_some();
            let Some(quality) = self.pending_quality.or(self.current_quality) else {
                return;
            };
            let index = if staging {
                self.next_index
            } else {
                self.current_index
            };

            if let Some(line) = self.lines.get(&quality).copied() {
                if index < line.first_sequence {
                    warn!(
                        index,
                        first = line.first_sequence,
                        "Buffer: Segment not available anymore, skipping ahead"
                    );
                    if staging {
                        self.next_index = line.first_sequence;
                    } else {
                        self.current_index = line.first_sequence;
                    }
                    continue;
                }
                if index >= line.end() {
                    if line.ended {
                        self.is_final = true;
                        if !self.final_signaled {
                            self.final_signaled = true;
                            info!(quality = %quality, "Buffer: Last segment reached");
                            events.publish(BufferEvent::Final);
                        }
                    }
                    return;
                }
            }

            let buffered = self.current.duration() + self.next.duration();
            let max = self.sizes().max;
            let info = self
                .downloaded
                .get(&quality)
                .and_then(|d| d.get(&index))
                .copied();
            let Some(info) = info else {
                if buffered < max {
                    trace!(quality = %quality, index, "Buffer: Next segment not downloaded");
                    events.publish(BufferEvent::NoNextSegmentDownloaded { quality, index });
                }
                return;
            };
            if buffered > 0. && buffered + info.duration > max + DURATION_EPSILON {
                return;
            }
            let Some(data) = self.store.get(info.handle) else {
                warn!(quality = %quality, index, "Buffer: No data for downloaded segment");
                events.publish(BufferEvent::NoDataForSegment { quality, index });
                return;
            };
            let segment = BufferedSegment {
                quality,
                index,
                data,
                duration: info.duration,
            };
            if staging {
                self.next.push_back(segment);
                self.next_index += 1;
            } else {
                self.current.push_back(segment);
                self.current_index += 1;
            }
            events.publish(BufferEvent::SegmentPrepared {
                quality,
                index,
                duration: info.duration,
            });
        }
    }
}
