//! Visibility intervals for a track.
//!
//! Consecutive frames with the same visibility are merged into one
//! interval. Times not covered by any interval count as visible.

use super::sample_index::wrap_time;
use crate::util::Chrono;

/// Time range over which a track is shown or hidden.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibilityInterval {
    pub start: Chrono,
    pub end: Chrono,
    pub visible: bool,
}

/// Ordered, non-overlapping visibility intervals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilityTrack {
    intervals: Vec<VisibilityInterval>,
}

impl VisibilityTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted intervals.
    pub fn from_intervals(intervals: Vec<VisibilityInterval>) -> Self {
        Self { intervals }
    }

    pub fn intervals(&self) -> &[VisibilityInterval] {
        &self.intervals
    }

    /// Record the visibility of a frame at `time`.
    ///
    /// Times must be increasing. The current interval grows up to `time`; a
    /// change of state starts a new interval at `time`.
    pub fn add_sample(&mut self, time: Chrono, visible: bool) {
        match self.intervals.last_mut() {
            Some(last) => {
                debug_assert!(time >= last.end);
                last.end = time;
                if last.visible != visible {
                    self.intervals.push(VisibilityInterval {
                        start: time,
                        end: time,
                        visible,
                    });
                }
            }
            None => self.intervals.push(VisibilityInterval {
                start: time,
                end: time,
                visible,
            }),
        }
    }

    /// Extend the last interval to the end of the track.
    pub fn finish(&mut self, duration: Chrono) {
        if let Some(last) = self.intervals.last_mut() {
            last.end = last.end.max(duration);
        }
    }

    /// Visibility at `time`; `duration` is used to wrap looping playback.
    pub fn is_visible(&self, time: Chrono, looping: bool, duration: Chrono) -> bool {
        let time = if looping { wrap_time(time, duration) } else { time };
        let idx = self.intervals.partition_point(|i| i.start <= time);
        if idx == 0 {
            return true;
        }
        let interval = &self.intervals[idx - 1];
        if time <= interval.end {
            interval.visible
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_query() {
        let mut v = VisibilityTrack::new();
        v.add_sample(0.0, true);
        v.add_sample(1.0, true);
        v.add_sample(2.0, false);
        v.add_sample(3.0, false);
        v.add_sample(4.0, true);
        v.finish(5.0);

        assert_eq!(v.intervals().len(), 3);
        assert_eq!(v.intervals()[0], VisibilityInterval { start: 0.0, end: 2.0, visible: true });
        assert!(v.is_visible(1.5, false, 5.0));
        assert!(!v.is_visible(2.0, false, 5.0));
        assert!(!v.is_visible(3.9, false, 5.0));
        assert!(v.is_visible(4.5, false, 5.0));
        assert!(!v.is_visible(7.5, true, 5.0));
    }

    #[test]
    fn test_default_visible() {
        let v = VisibilityTrack::new();
        assert!(v.is_visible(3.0, false, 0.0));

        let mut v = VisibilityTrack::new();
        v.add_sample(1.0, false);
        assert!(v.is_visible(0.5, false, 2.0));
        assert!(!v.is_visible(1.0, false, 2.0));
        assert!(v.is_visible(1.5, false, 2.0));
    }
}
