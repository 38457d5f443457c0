//! Per-track list of compressed frame chunks.

use smallvec::SmallVec;

use super::sample_index::{wrap_time, SampleIndex};
use crate::util::{Chrono, Error, Result};

/// Chunk ids returned by a range query.
pub type ChunkIds = SmallVec<[u32; 8]>;

/// A contiguous compressed blob covering the closed frame interval
/// `[first_frame, last_frame]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Chunk {
    pub data_size: u32,
    pub first_frame: f32,
    pub last_frame: f32,
    /// Byte offset of the payload in the track's data source.
    pub offset: u64,
}

impl Chunk {
    #[inline]
    pub fn contains_frame(&self, frame: u32) -> bool {
        let f = frame as f32;
        self.first_frame <= f && f <= self.last_frame
    }
}

/// Ordered, non-overlapping chunks of one track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted chunks.
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// Start a chunk at `frame` whose payload lives at `offset`.
    ///
    /// The previous chunk is closed at `frame - 1`. Returns the new chunk id.
    pub fn append_chunk(&mut self, frame: u32, offset: u64, data_size: u32) -> u32 {
        if let Some(prev) = self.chunks.last_mut() {
            assert!(
                frame as f32 > prev.first_frame,
                "chunk for frame {frame} appended out of order"
            );
            prev.last_frame = (frame - 1) as f32;
        }
        self.chunks.push(Chunk {
            data_size,
            first_frame: frame as f32,
            last_frame: frame as f32,
            offset,
        });
        (self.chunks.len() - 1) as u32
    }

    /// Close the last chunk at `last_frame`.
    pub fn finish(&mut self, last_frame: u32) {
        if let Some(last) = self.chunks.last_mut() {
            last.last_frame = last.last_frame.max(last_frame as f32);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn get(&self, id: u32) -> Result<&Chunk> {
        self.chunks.get(id as usize).ok_or(Error::ChunkOutOfBounds {
            index: id,
            count: self.chunks.len() as u32,
        })
    }

    /// Chunk holding `frame`.
    pub fn chunk_for_frame(&self, frame: u32) -> Option<u32> {
        let f = frame as f32;
        let idx = self.chunks.partition_point(|c| c.last_frame < f);
        self.chunks
            .get(idx)
            .filter(|c| c.first_frame <= f)
            .map(|_| idx as u32)
    }

    /// Push every chunk intersecting `[first, last]` into `out`.
    fn chunks_for_frame_range(&self, first: usize, last: usize, out: &mut ChunkIds) {
        let (first, last) = (first as f32, last as f32);
        let start = self.chunks.partition_point(|c| c.last_frame < first);
        for (id, chunk) in self.chunks.iter().enumerate().skip(start) {
            if chunk.first_frame > last {
                break;
            }
            let id = id as u32;
            if !out.contains(&id) {
                out.push(id);
            }
        }
    }

    /// Chunks needed to display every frame in `[start, end]`, including the
    /// frame after `end` used for interpolation.
    ///
    /// Looping queries that wrap past the track's end are split into
    /// `[start, duration]` and `[0, end]`. A looping window reaching past the
    /// last sample also needs frame 0, the blend target of the last frame.
    pub fn chunks_for_time_range(&self, samples: &SampleIndex, start: Chrono, end: Chrono, looping: bool) -> ChunkIds {
        let mut out = ChunkIds::new();
        if self.chunks.is_empty() || samples.is_empty() {
            return out;
        }

        let query = |s: Chrono, e: Chrono, out: &mut ChunkIds| {
            self.chunks_for_frame_range(samples.floor_frame(s), samples.ceil_frame(e), out);
        };

        if !looping {
            query(start, end.max(start), &mut out);
            return out;
        }

        let duration = samples.duration();
        if end - start >= duration {
            out.extend(0..self.chunks.len() as u32);
            return out;
        }
        let s = wrap_time(start, duration);
        let e = wrap_time(end, duration);
        if e < s {
            query(s, duration, &mut out);
            query(0.0, e, &mut out);
        } else {
            query(s, e, &mut out);
            // Past the last sample the blend runs toward frame 0.
            if e > samples.last_time() {
                query(0.0, 0.0, &mut out);
            }
        }
        out
    }

    /// Check that chunks are sorted, non-overlapping and cover exactly the
    /// frames `0..frame_count`.
    pub fn validate_coverage(&self, frame_count: usize) -> Result<()> {
        if frame_count == 0 {
            return if self.chunks.is_empty() {
                Ok(())
            } else {
                Err(Error::invalid("chunks present for an empty track"))
            };
        }
        let first = self.chunks.first().ok_or_else(|| Error::invalid("track has no chunks"))?;
        if first.first_frame != 0.0 {
            return Err(Error::invalid(format!("first chunk starts at frame {}", first.first_frame)));
        }
        for (i, c) in self.chunks.iter().enumerate() {
            if c.last_frame < c.first_frame {
                return Err(Error::invalid(format!("chunk {i} has an inverted frame range")));
            }
            if let Some(next) = self.chunks.get(i + 1) {
                if next.first_frame != c.last_frame + 1.0 {
                    return Err(Error::invalid(format!(
                        "chunk {} starts at frame {} after chunk {i} ends at {}",
                        i + 1,
                        next.first_frame,
                        c.last_frame
                    )));
                }
            }
        }
        let last = self.chunks[self.chunks.len() - 1].last_frame;
        if last != (frame_count - 1) as f32 {
            return Err(Error::invalid(format!(
                "last chunk ends at frame {last}, track has {frame_count} frames"
            )));
        }
        Ok(())
    }
}
