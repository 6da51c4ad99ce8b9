use std::collections::VecDeque;

use super::BufferedSegment;

/// FIFO of segments, keeping track of their cumulated duration.
#[derive(Debug, Default)]
pub(super) struct Timeline {
    segments: VecDeque<BufferedSegment>,
    duration: f64,
}

impl Timeline {
    pub(super) fn push_back(&mut self, segment: BufferedSegment) {
        self.duration += segment.duration;
        self.segments.push_back(segment);
    }

    pub(super) fn pop_front(&mut self) -> Option<BufferedSegment> {
        let segment = self.segments.pop_front()?;
        self.duration = if self.segments.is_empty() {
            0.
        } else {
            (self.duration - segment.duration).max(0.)
        };
        Some(segment)
    }

    pub(super) fn front(&self) -> Option<&BufferedSegment> {
        self.segments.front()
    }

    pub(super) fn get(&self, pos: usize) -> Option<&BufferedSegment> {
        self.segments.get(pos)
    }

    pub(super) fn len(&self) -> usize {
        self.segments.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Cumulated duration of all segments, in seconds.
    pub(super) fn duration(&self) -> f64 {
        self.duration
    }

    pub(super) fn clear(&mut self) {
        self.segments.clear();
        self.duration = 0.;
    }

    /// Remove the oldest segments until the cumulated duration is within
    /// `max_duration`.
    pub(super) fn trim_to(&mut self, max_duration: f64) {
        while self.duration > max_duration {
            if self.pop_front().is_none() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::buffer::QualityKey;

    fn seg(index: u64, duration: f64) -> BufferedSegment {
        BufferedSegment {
            quality: QualityKey::new(0, 0),
            index,
            data: Bytes::new(),
            duration,
        }
    }

    #[test]
    fn test_fifo_and_duration() {
        let mut timeline = Timeline::default();
        assert!(timeline.is_empty());
        timeline.push_back(seg(0, 4.));
        timeline.push_back(seg(1, 6.));
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.duration(), 10.);
        assert_eq!(timeline.front().map(|s| s.index), Some(0));
        assert_eq!(timeline.get(1).map(|s| s.index), Some(1));
        assert_eq!(timeline.pop_front().map(|s| s.index), Some(0));
        assert_eq!(timeline.duration(), 6.);
        assert_eq!(timeline.pop_front().map(|s| s.index), Some(1));
        assert_eq!(timeline.duration(), 0.);
        assert!(timeline.pop_front().is_none());
    }

    #[test]
    fn test_trim_to() {
        let mut timeline = Timeline::default();
        for i in 0..5 {
            timeline.push_back(seg(i, 10.));
        }
        timeline.trim_to(25.);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.front().map(|s| s.index), Some(3));
        timeline.trim_to(0.);
        assert!(timeline.is_empty());
    }
}
