//! Persisted track file layout.
//!
//! All values are little-endian:
//!
//! ```text
//! chunkCount:u32
//! chunkCount x { dataSize:i32, firstFrame:f32, lastFrame:f32, payload[dataSize] }
//! sampleCount:u32
//! sampleCount x { sampleTime:f32, bbox:f32[6], numVertices:i32, numIndices:i32 }
//! intervalCount:u32
//! intervalCount x { start:f32, end:f32, visible:u8 }
//! codecId:u8, [codec config]
//! constantFlags:u8
//! topologyCount:u32, ranges:u32[topologyCount]
//! ```
//!
//! Loaded chunks record the file offset of their payload, so payloads can
//! be read on demand.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use super::chunk::{Chunk, ChunkStore};
use super::sample_index::{SampleIndex, TrackSample};
use super::topology::TopologyRanges;
use super::visibility::{VisibilityInterval, VisibilityTrack};
use crate::codec::Codec;
use crate::geom::ConstantStreams;
use crate::streaming::source::{SourceCursor, TrackSource};
use crate::util::{BBox3f, Error, Result};

const CHUNK_RECORD_SIZE: u64 = 12;
const SAMPLE_RECORD_SIZE: u64 = 36;
const INTERVAL_RECORD_SIZE: u64 = 9;

/// Everything about a track except the chunk payloads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackLayout {
    pub codec: Codec,
    pub constants: ConstantStreams,
    pub chunks: ChunkStore,
    pub samples: SampleIndex,
    pub visibility: VisibilityTrack,
    pub topology: TopologyRanges,
}

/// Write a track file.
///
/// Chunk payloads are taken from `payloads` at each chunk's offset. Returns
/// the number of bytes written.
pub fn write_track<W: Write>(w: &mut W, layout: &TrackLayout, payloads: &[u8]) -> Result<u64> {
    let mut written = 4u64;
    w.write_u32::<LittleEndian>(layout.chunks.len() as u32)?;
    for chunk in layout.chunks.chunks() {
        let start = chunk.offset as usize;
        let payload = payloads
            .get(start..start + chunk.data_size as usize)
            .ok_or_else(|| Error::invalid(format!("chunk payload at {start} outside the payload buffer")))?;
        w.write_i32::<LittleEndian>(chunk.data_size as i32)?;
        w.write_f32::<LittleEndian>(chunk.first_frame)?;
        w.write_f32::<LittleEndian>(chunk.last_frame)?;
        w.write_all(payload)?;
        written += CHUNK_RECORD_SIZE + payload.len() as u64;
    }

    let samples = layout.samples.samples();
    w.write_u32::<LittleEndian>(samples.len() as u32)?;
    for s in samples {
        w.write_f32::<LittleEndian>(s.sample_time)?;
        for v in s.bounding_box.to_array() {
            w.write_f32::<LittleEndian>(v)?;
        }
        w.write_i32::<LittleEndian>(s.num_vertices as i32)?;
        w.write_i32::<LittleEndian>(s.num_indices as i32)?;
    }
    written += 4 + samples.len() as u64 * SAMPLE_RECORD_SIZE;

    let intervals = layout.visibility.intervals();
    w.write_u32::<LittleEndian>(intervals.len() as u32)?;
    for i in intervals {
        w.write_f32::<LittleEndian>(i.start)?;
        w.write_f32::<LittleEndian>(i.end)?;
        w.write_u8(u8::from(i.visible))?;
    }
    written += 4 + intervals.len() as u64 * INTERVAL_RECORD_SIZE;

    let mut trailer = Vec::new();
    layout.codec.write(&mut trailer)?;
    trailer.write_u8(layout.constants.to_bits())?;
    trailer.write_u32::<LittleEndian>(layout.topology.len() as u32)?;
    for &r in layout.topology.as_slice() {
        trailer.write_u32::<LittleEndian>(r)?;
    }
    w.write_all(&trailer)?;
    written += trailer.len() as u64;

    debug!(
        chunks = layout.chunks.len(),
        samples = samples.len(),
        bytes = written,
        "wrote track"
    );
    Ok(written)
}

/// Little-endian reader reporting truncation as [`Error::UnexpectedEof`].
struct LayoutReader<'a> {
    cursor: SourceCursor<'a>,
    size: u64,
}

impl LayoutReader<'_> {
    fn u8(&mut self) -> Result<u8> {
        let pos = self.cursor.position();
        self.cursor.read_u8().map_err(|e| Error::from_read(e, pos))
    }

    fn u32(&mut self) -> Result<u32> {
        let pos = self.cursor.position();
        self.cursor.read_u32::<LittleEndian>().map_err(|e| Error::from_read(e, pos))
    }

    fn i32(&mut self) -> Result<i32> {
        let pos = self.cursor.position();
        self.cursor.read_i32::<LittleEndian>().map_err(|e| Error::from_read(e, pos))
    }

    fn f32(&mut self) -> Result<f32> {
        let pos = self.cursor.position();
        self.cursor.read_f32::<LittleEndian>().map_err(|e| Error::from_read(e, pos))
    }

    /// Read a record count, rejecting counts the remaining bytes cannot hold.
    fn count(&mut self, record_size: u64, what: &str) -> Result<usize> {
        let count = self.u32()?;
        let remaining = self.size - self.cursor.position();
        if u64::from(count) * record_size > remaining {
            return Err(Error::invalid(format!(
                "{count} {what} records do not fit the remaining {remaining} bytes"
            )));
        }
        Ok(count as usize)
    }
}

impl<'a> Read for LayoutReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

/// Parse a track file's layout, skipping over chunk payloads.
pub fn read_layout(source: &TrackSource) -> Result<TrackLayout> {
    let mut r = LayoutReader {
        cursor: source.cursor(0),
        size: source.size(),
    };

    let chunk_count = r.count(CHUNK_RECORD_SIZE, "chunk")?;
    let mut chunks = Vec::with_capacity(chunk_count);
    for id in 0..chunk_count {
        let data_size = r.i32()?;
        if data_size < 0 {
            return Err(Error::invalid(format!("chunk {id} has negative size {data_size}")));
        }
        let first_frame = r.f32()?;
        let last_frame = r.f32()?;
        let offset = r.cursor.position();
        r.cursor.skip(data_size as u64)?;
        chunks.push(Chunk {
            data_size: data_size as u32,
            first_frame,
            last_frame,
            offset,
        });
    }

    let sample_count = r.count(SAMPLE_RECORD_SIZE, "sample")?;
    let mut samples = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        let sample_time = r.f32()?;
        let mut bbox = [0.0f32; 6];
        for v in &mut bbox {
            *v = r.f32()?;
        }
        let num_vertices = r.i32()?;
        let num_indices = r.i32()?;
        if num_vertices < 0 || num_indices < 0 {
            return Err(Error::invalid("negative sample vertex or index count"));
        }
        samples.push(TrackSample {
            sample_time,
            bounding_box: BBox3f::from_array(bbox),
            num_vertices: num_vertices as u32,
            num_indices: num_indices as u32,
        });
    }

    let interval_count = r.count(INTERVAL_RECORD_SIZE, "visibility")?;
    let mut intervals = Vec::with_capacity(interval_count);
    for _ in 0..interval_count {
        let start = r.f32()?;
        let end = r.f32()?;
        let visible = r.u8()? != 0;
        intervals.push(VisibilityInterval { start, end, visible });
    }

    let codec = Codec::read(&mut r)?;
    let constants = ConstantStreams::from_bits(r.u8()?);
    let range_count = r.count(4, "topology")?;
    let mut ranges = Vec::with_capacity(range_count);
    for _ in 0..range_count {
        ranges.push(r.u32()?);
    }

    let layout = TrackLayout {
        codec,
        constants,
        chunks: ChunkStore::from_chunks(chunks),
        samples: SampleIndex::from_samples(samples)?,
        visibility: VisibilityTrack::from_intervals(intervals),
        topology: TopologyRanges::from_vec(ranges)?,
    };
    layout.chunks.validate_coverage(layout.samples.len())?;
    debug!(
        codec = layout.codec.name(),
        chunks = layout.chunks.len(),
        samples = layout.samples.len(),
        "read track layout"
    );
    Ok(layout)
}
