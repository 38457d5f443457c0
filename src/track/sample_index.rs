//! Time to frame lookup over a track's always-resident samples.

use crate::util::{BBox3f, Chrono, Error, Result};

/// Per-frame metadata kept in memory for the whole track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackSample {
    pub sample_time: Chrono,
    pub bounding_box: BBox3f,
    pub num_vertices: u32,
    pub num_indices: u32,
}

/// Result of a time lookup between two neighbouring frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleInterp {
    /// Frame to display.
    pub frame_index: usize,
    /// Frame to blend towards.
    pub next_frame_index: usize,
    /// Blend factor in `[0, 1]` (0 = `frame_index`, 1 = `next_frame_index`).
    pub factor: f32,
}

/// Wrap `time` into `[0, duration)`, also for negative times.
pub fn wrap_time(time: Chrono, duration: Chrono) -> Chrono {
    if !(duration > 0.0) {
        return 0.0;
    }
    let mut wrapped = time % duration;
    if wrapped < 0.0 {
        wrapped += duration;
    }
    if wrapped >= duration {
        0.0
    } else {
        wrapped
    }
}

/// Samples sorted by strictly increasing time; array index is the frame id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleIndex {
    samples: Vec<TrackSample>,
}

impl SampleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from samples, checking that times strictly increase.
    pub fn from_samples(samples: Vec<TrackSample>) -> Result<Self> {
        if let Some(w) = samples.windows(2).find(|w| !(w[1].sample_time > w[0].sample_time)) {
            return Err(Error::invalid(format!(
                "sample times not strictly increasing: {} then {}",
                w[0].sample_time, w[1].sample_time
            )));
        }
        Ok(Self { samples })
    }

    /// Append a sample. Its time must exceed the last sample's.
    pub fn push(&mut self, sample: TrackSample) {
        if let Some(last) = self.samples.last() {
            assert!(
                sample.sample_time > last.sample_time,
                "sample time {} does not follow {}",
                sample.sample_time,
                last.sample_time
            );
        }
        self.samples.push(sample);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[TrackSample] {
        &self.samples
    }

    pub fn get(&self, frame: usize) -> Option<&TrackSample> {
        self.samples.get(frame)
    }

    #[inline]
    fn time(&self, frame: usize) -> Chrono {
        self.samples[frame].sample_time
    }

    /// Time of the last sample (0 when empty).
    pub fn last_time(&self) -> Chrono {
        self.samples.last().map_or(0.0, |s| s.sample_time)
    }

    /// Average spacing between samples (0 with fewer than two).
    pub fn mean_interval(&self) -> Chrono {
        match self.samples.len() {
            0 | 1 => 0.0,
            n => (self.time(n - 1) - self.time(0)) / (n - 1) as Chrono,
        }
    }

    /// Playback length: the last sample time plus one mean interval, so the
    /// last frame is shown as long as the others.
    pub fn duration(&self) -> Chrono {
        match self.samples.last() {
            Some(last) => last.sample_time + self.mean_interval(),
            None => 0.0,
        }
    }

    fn effective_time(&self, time: Chrono, looping: bool) -> Chrono {
        if looping {
            wrap_time(time, self.duration())
        } else {
            time
        }
    }

    /// Largest frame whose time is `<= time`, clamped to the valid range.
    pub fn floor_frame(&self, time: Chrono) -> usize {
        // Binary search for floor
        let idx = self.samples.partition_point(|s| s.sample_time <= time);
        idx.saturating_sub(1).min(self.samples.len().saturating_sub(1))
    }

    /// Smallest frame whose time is `>= time`, clamped to the valid range.
    pub fn ceil_frame(&self, time: Chrono) -> usize {
        let idx = self.samples.partition_point(|s| s.sample_time < time);
        idx.min(self.samples.len().saturating_sub(1))
    }

    /// Frame shown at `time`.
    pub fn find_sample_index_from_time(&self, time: Chrono, looping: bool) -> usize {
        if self.samples.is_empty() {
            return 0;
        }
        self.floor_frame(self.effective_time(time, looping))
    }

    /// Frame shown at `time`, the frame after it and the blend factor.
    ///
    /// When looping, the frame after the last is frame 0, reached at
    /// [`SampleIndex::duration`]. When `reversed`, the pair is swapped and
    /// the factor inverted.
    pub fn find_sample_indexes_from_time(&self, time: Chrono, looping: bool, reversed: bool) -> SampleInterp {
        let n = self.samples.len();
        if n == 0 {
            return SampleInterp {
                frame_index: 0,
                next_frame_index: 0,
                factor: 0.0,
            };
        }

        let time = self.effective_time(time, looping);
        let frame = self.floor_frame(time);
        let (next, next_time) = if frame + 1 < n {
            (frame + 1, self.time(frame + 1))
        } else if looping {
            (0, self.duration())
        } else {
            (frame, self.time(frame))
        };

        let frame_time = self.time(frame);
        let span = next_time - frame_time;
        let factor = if span > 0.0 {
            ((time - frame_time) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };

        if reversed {
            SampleInterp {
                frame_index: next,
                next_frame_index: frame,
                factor: 1.0 - factor,
            }
        } else {
            SampleInterp {
                frame_index: frame,
                next_frame_index: next,
                factor,
            }
        }
    }

    /// Union of all sample bounding boxes.
    pub fn bounds(&self) -> BBox3f {
        let mut b = BBox3f::EMPTY;
        for s in &self.samples {
            b.expand_by_box(&s.bounding_box);
        }
        b
    }
}
