//! Streamable geometry cache tracks.
//!
//! A track is a sequence of encoded mesh frames plus always-resident
//! metadata:
//! - [`ChunkStore`] - where each frame's compressed payload lives
//! - [`SampleIndex`] - per-frame time, bounds and counts
//! - [`TopologyRanges`] - frames where connectivity changes
//! - [`VisibilityTrack`] - shown/hidden intervals
//!
//! [`EncodeSession`] builds tracks; [`StreamableTrack`] reads them back.

pub mod chunk;
pub mod layout;
pub mod sample_index;
pub mod topology;
pub mod visibility;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};

pub use chunk::{Chunk, ChunkIds, ChunkStore};
pub use layout::{read_layout, write_track, TrackLayout};
pub use sample_index::{wrap_time, SampleIndex, SampleInterp, TrackSample};
pub use topology::{is_same_topology, TopologyRanges};
pub use visibility::{VisibilityInterval, VisibilityTrack};

use crate::codec::encoder::frame_bounds;
use crate::codec::{Codec, DecodeState, EncodeStatistics};
use crate::geom::{ConstantStreams, MeshFrame};
use crate::streaming::source::TrackSource;
use crate::util::{Chrono, Error, Result};

/// A loaded track: layout in memory, payloads in its [`TrackSource`].
#[derive(Debug)]
pub struct StreamableTrack {
    name: String,
    layout: TrackLayout,
    source: Arc<TrackSource>,
}

impl StreamableTrack {
    /// Open a track file, memory mapped when `resident`, otherwise read on
    /// demand.
    pub fn open(path: impl AsRef<Path>, resident: bool) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let track = Self::from_source(name, TrackSource::open(path, resident)?)?;
        info!(
            "Opened track '{}': {} frames, {} chunks, codec {}",
            track.name,
            track.frame_count(),
            track.chunks().len(),
            track.codec().name()
        );
        Ok(track)
    }

    /// Parse a track from any source.
    pub fn from_source(name: impl Into<String>, source: TrackSource) -> Result<Self> {
        let layout = read_layout(&source)?;
        Ok(Self {
            name: name.into(),
            layout,
            source: Arc::new(source),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codec(&self) -> &Codec {
        &self.layout.codec
    }

    /// Streams stored only in frame 0.
    pub fn constants(&self) -> ConstantStreams {
        self.layout.constants
    }

    pub fn layout(&self) -> &TrackLayout {
        &self.layout
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.layout.chunks
    }

    pub fn samples(&self) -> &SampleIndex {
        &self.layout.samples
    }

    pub fn topology(&self) -> &TopologyRanges {
        &self.layout.topology
    }

    pub fn visibility(&self) -> &VisibilityTrack {
        &self.layout.visibility
    }

    pub fn source(&self) -> &Arc<TrackSource> {
        &self.source
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.layout.samples.len()
    }

    pub fn duration(&self) -> Chrono {
        self.layout.samples.duration()
    }

    /// Frame pair and blend factor shown at `time`.
    pub fn find_sample_indexes_from_time(&self, time: Chrono, looping: bool, reversed: bool) -> SampleInterp {
        self.layout.samples.find_sample_indexes_from_time(time, looping, reversed)
    }

    /// Chunks needed to show `[start, end]`.
    pub fn chunks_for_time_range(&self, start: Chrono, end: Chrono, looping: bool) -> ChunkIds {
        self.layout
            .chunks
            .chunks_for_time_range(&self.layout.samples, start, end, looping)
    }

    pub fn is_same_topology(&self, frame_a: usize, frame_b: usize) -> bool {
        self.layout.topology.is_same_topology(frame_a as u32, frame_b as u32)
    }

    pub fn visibility_at(&self, time: Chrono, looping: bool) -> bool {
        self.layout.visibility.is_visible(time, looping, self.duration())
    }

    /// Fresh decoder state for one consumer thread.
    pub fn create_decode_state(&self) -> DecodeState {
        self.layout.codec.create_decode_state(self.layout.constants)
    }

    /// Chunk holding `frame`.
    pub fn chunk_for_frame(&self, frame: usize) -> Result<u32> {
        let count = self.frame_count() as u32;
        self.layout
            .chunks
            .chunk_for_frame(frame as u32)
            .ok_or(Error::SampleOutOfBounds {
                index: frame as u32,
                count,
            })
    }

    /// Read a chunk's payload synchronously.
    pub fn read_chunk(&self, id: u32) -> Result<Vec<u8>> {
        let chunk = self.layout.chunks.get(id)?;
        self.source.read_bytes(chunk.offset, chunk.data_size as usize)
    }

    /// Decode chunk bytes with the track's codec.
    pub fn decode_chunk(&self, state: &mut DecodeState, bytes: &[u8], out: &mut MeshFrame) -> Result<()> {
        self.layout.codec.decode_frame(state, bytes, out)
    }

    /// Read and decode `frame` without going through a cache.
    ///
    /// Frame 0 is decoded first when `state` still lacks the constant
    /// streams.
    pub fn decode_frame(&self, state: &mut DecodeState, frame: usize, out: &mut MeshFrame) -> Result<()> {
        if frame != 0 && !state.has_keyframe() {
            self.decode_frame(state, 0, out)?;
        }
        let bytes = self.read_chunk(self.chunk_for_frame(frame)?)?;
        self.decode_chunk(state, &bytes, out)
    }
}

/// Per-frame input for [`EncodeSession::add_frames`].
#[derive(Clone, Copy, Debug)]
pub struct FrameInput<'a> {
    pub mesh: &'a MeshFrame,
    pub time: Chrono,
    pub visible: bool,
}

/// Builds a track frame by frame.
///
/// Frame 0 is the keyframe and carries the track's constant streams.
#[derive(Debug)]
pub struct EncodeSession {
    codec: Codec,
    constants: ConstantStreams,
    chunks: ChunkStore,
    samples: SampleIndex,
    topology: TopologyRanges,
    visibility: VisibilityTrack,
    payloads: Vec<u8>,
    previous_topology: Option<(usize, Vec<u32>)>,
    statistics: EncodeStatistics,
}

impl EncodeSession {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            constants: ConstantStreams::default(),
            chunks: ChunkStore::new(),
            samples: SampleIndex::new(),
            topology: TopologyRanges::new(),
            visibility: VisibilityTrack::new(),
            payloads: Vec::new(),
            previous_topology: None,
            statistics: EncodeStatistics::default(),
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.samples.len()
    }

    /// Totals over every frame added so far.
    pub fn statistics(&self) -> &EncodeStatistics {
        &self.statistics
    }

    /// Encode one frame shown from `time`.
    ///
    /// # Panics
    ///
    /// Panics if `time` does not increase, if the frame breaks the encoder
    /// preconditions, or if its constant-stream flags differ from frame 0's.
    pub fn add_frame(&mut self, mesh: &MeshFrame, time: Chrono, visible: bool) -> Result<EncodeStatistics> {
        let mut bytes = Vec::new();
        let keyframe = self.frame_count() == 0;
        let stats = self.codec.encode_frame(mesh, keyframe, &mut bytes)?;
        self.append_encoded(FrameInput { mesh, time, visible }, &bytes, &stats);
        Ok(stats)
    }

    /// Encode several frames in parallel, then append them in order.
    pub fn add_frames(&mut self, frames: &[FrameInput<'_>]) -> Result<EncodeStatistics> {
        let first = self.frame_count();
        let codec = self.codec;
        let encoded = frames
            .par_iter()
            .enumerate()
            .map(|(i, input)| {
                let mut bytes = Vec::new();
                let stats = codec.encode_frame(input.mesh, first + i == 0, &mut bytes)?;
                Ok((bytes, stats))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut total = EncodeStatistics::default();
        for (input, (bytes, stats)) in frames.iter().zip(&encoded) {
            self.append_encoded(*input, bytes, stats);
            total.accumulate(stats);
        }
        Ok(total)
    }

    fn append_encoded(&mut self, input: FrameInput<'_>, bytes: &[u8], stats: &EncodeStatistics) {
        let frame = self.frame_count();
        let mesh = input.mesh;
        let constants = mesh.vertex_info.constant_streams();
        if frame == 0 {
            self.constants = constants;
        } else {
            assert_eq!(
                constants, self.constants,
                "frame {frame} changes the track's constant streams"
            );
        }

        self.samples.push(TrackSample {
            sample_time: input.time,
            bounding_box: frame_bounds(mesh),
            num_vertices: mesh.vertex_count() as u32,
            num_indices: mesh.index_count() as u32,
        });

        let topology_changed = match &self.previous_topology {
            Some((vertex_count, indices)) => *vertex_count != mesh.vertex_count() || *indices != mesh.indices,
            None => true,
        };
        if topology_changed {
            self.topology.push(frame as u32);
            self.previous_topology = Some((mesh.vertex_count(), mesh.indices.clone()));
        }

        self.visibility.add_sample(input.time, input.visible);
        self.chunks
            .append_chunk(frame as u32, self.payloads.len() as u64, bytes.len() as u32);
        self.payloads.extend_from_slice(bytes);
        self.statistics.accumulate(stats);
    }

    /// Close the track and return its layout and concatenated payloads.
    pub fn finish(mut self) -> (TrackLayout, Vec<u8>) {
        if let Some(last) = self.frame_count().checked_sub(1) {
            self.chunks.finish(last as u32);
        }
        self.visibility.finish(self.samples.duration());
        debug!(
            frames = self.samples.len(),
            topologies = self.topology.len(),
            raw_bytes = self.statistics.raw_bytes,
            coded_bytes = self.statistics.coded_bytes,
            "finished encode session"
        );
        let layout = TrackLayout {
            codec: self.codec,
            constants: self.constants,
            chunks: self.chunks,
            samples: self.samples,
            visibility: self.visibility,
            topology: self.topology,
        };
        (layout, self.payloads)
    }

    /// Serialize the track into a byte buffer.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let (layout, payloads) = self.finish();
        let mut bytes = Vec::with_capacity(payloads.len() + 64);
        write_track(&mut bytes, &layout, &payloads)?;
        Ok(bytes)
    }

    /// Turn the session into an in-memory track.
    pub fn into_track(self, name: impl Into<String>) -> Result<StreamableTrack> {
        StreamableTrack::from_source(name, TrackSource::from_bytes(self.into_bytes()?))
    }

    /// Write the track to `path`. Returns the file size.
    pub fn write_to_file(self, path: impl AsRef<Path>) -> Result<u64> {
        let (layout, payloads) = self.finish();
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        let written = write_track(&mut w, &layout, &payloads)?;
        w.flush()?;
        info!("Wrote {} frames ({} bytes) to {}", layout.samples.len(), written, path.as_ref().display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::geom::{Color, VertexInfo};
    use crate::util::Vec3;

    fn strip(vertex_count: u32, offset: f32, constant: bool) -> MeshFrame {
        let mut mesh = MeshFrame::new();
        mesh.positions = (0..vertex_count)
            .map(|i| Vec3::new(i as f32 * 0.5, offset, (i % 2) as f32))
            .collect();
        mesh.indices = (0..vertex_count - 2).flat_map(|i| [i, i + 1, i + 2]).collect();
        mesh.colors = vec![Color::new(10, 20, 30, 255); vertex_count as usize];
        mesh.vertex_info = VertexInfo {
            has_color0: true,
            constant_indices: constant,
            constant_color0: constant,
            ..VertexInfo::default()
        };
        mesh
    }

    #[test]
    fn test_session_builds_track() {
        let mut session = EncodeSession::new(Codec::EntropyV1(EncoderConfig::default()));
        for f in 0..4 {
            session.add_frame(&strip(6, f as f32 * 0.1, false), f as f32 / 24.0, f != 2).expect("encode");
        }
        session.add_frame(&strip(8, 1.0, false), 4.0 / 24.0, true).expect("encode");
        let track = session.into_track("strip").expect("track");

        assert_eq!(track.frame_count(), 5);
        assert_eq!(track.chunks().len(), 5);
        assert_eq!(track.topology().as_slice(), &[0, 4]);
        assert!(track.is_same_topology(1, 3));
        assert!(!track.is_same_topology(3, 4));
        assert!(!track.visibility_at(2.0 / 24.0, false));
        assert!(track.visibility_at(3.0 / 24.0, false));

        let mut state = track.create_decode_state();
        let mut out = MeshFrame::new();
        track.decode_frame(&mut state, 4, &mut out).expect("decode");
        assert_eq!(out.vertex_count(), 8);
        assert!((out.positions[7].y - 1.0).abs() <= 0.01);
    }

    #[test]
    fn test_constant_streams_decode_keyframe_first() {
        let mut session = EncodeSession::new(Codec::default());
        for f in 0..3 {
            session.add_frame(&strip(5, f as f32, true), f as f32, true).expect("encode");
        }
        let track = session.into_track("constant").expect("track");
        assert!(track.constants().indices);
        assert!(track.constants().color0);

        let mut state = track.create_decode_state();
        let mut out = MeshFrame::new();
        track.decode_frame(&mut state, 2, &mut out).expect("decode");
        assert!(state.has_keyframe());
        assert_eq!(out.indices, strip(5, 0.0, true).indices);
        assert_eq!(out.colors.len(), 5);
        assert!((out.positions[0].y - 2.0).abs() <= 0.01);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let meshes: Vec<MeshFrame> = (0..6).map(|f| strip(7, f as f32 * 0.25, false)).collect();
        let inputs: Vec<FrameInput<'_>> = meshes
            .iter()
            .enumerate()
            .map(|(f, mesh)| FrameInput {
                mesh,
                time: f as f32,
                visible: true,
            })
            .collect();

        let mut parallel = EncodeSession::new(Codec::default());
        parallel.add_frames(&inputs).expect("encode");
        let mut sequential = EncodeSession::new(Codec::default());
        for input in &inputs {
            sequential.add_frame(input.mesh, input.time, input.visible).expect("encode");
        }
        assert_eq!(parallel.into_bytes().expect("bytes"), sequential.into_bytes().expect("bytes"));
    }

    #[test]
    fn test_out_of_range_frame() {
        let mut session = EncodeSession::new(Codec::Raw);
        session.add_frame(&strip(4, 0.0, false), 0.0, true).expect("encode");
        let track = session.into_track("raw").expect("track");
        let mut state = track.create_decode_state();
        assert!(matches!(
            track.decode_frame(&mut state, 3, &mut MeshFrame::new()),
            Err(Error::SampleOutOfBounds { index: 3, count: 1 })
        ));
    }

    #[test]
    #[should_panic(expected = "does not follow")]
    fn test_time_must_increase() {
        let mut session = EncodeSession::new(Codec::Raw);
        session.add_frame(&strip(4, 0.0, false), 1.0, true).expect("encode");
        let _ = session.add_frame(&strip(4, 0.0, false), 1.0, true);
    }
}
