//! Entropy-coded frame decoder.
//!
//! Decoding mirrors [`super::encoder`]: header, batches and bounds, the
//! stream description, one Huffman table per coded stream, then the streams
//! in table order. Decoding is sequential within a frame; independent frames
//! may be decoded concurrently as long as each thread owns its
//! [`DecodeState`].

use std::io::Cursor;

use tracing::error;

use super::bitstream::BitReader;
use super::frame::{
    read_frame_extras, FrameHeader, MotionVectorStreamHeader, PositionStreamHeader,
    StreamDescription, TableId, UvStreamHeader, FRAME_MAGIC,
};
use super::history::{History, COLOR_HISTORY, INDEX_HISTORY, MOTION_VECTOR_HISTORY, NORMAL_HISTORY, UV_HISTORY};
use super::huffman::{read_signed, HuffmanDecodeTable};
use super::prediction::VertexPredictor;
use super::quantizer::{Vec2Quantizer, Vec3Quantizer};
use crate::geom::{Color, ConstantStreams, MeshFrame, PackedNormal, VertexInfo};
use crate::util::{Error, IVec2, IVec3, Result, Vec2, Vec3};

/// Per-consumer decoder state.
///
/// Holds the constant streams of the track's keyframe so later frames, which
/// omit them, can be reconstructed.
#[derive(Debug, Clone, Default)]
pub struct DecodeState {
    constants: ConstantStreams,
    indices: Option<Vec<u32>>,
    uvs: Option<Vec<Vec2>>,
    colors: Option<Vec<Color>>,
    frames_decoded: u64,
}

impl DecodeState {
    /// State for a track storing `constants` only in its keyframe.
    pub fn new(constants: ConstantStreams) -> Self {
        Self {
            constants,
            ..Self::default()
        }
    }

    pub fn constants(&self) -> ConstantStreams {
        self.constants
    }

    /// Whether every constant stream of the track has been captured.
    pub fn has_keyframe(&self) -> bool {
        (!self.constants.indices || self.indices.is_some())
            && (!self.constants.uv0 || self.uvs.is_some())
            && (!self.constants.color0 || self.colors.is_some())
    }

    /// Number of frames successfully decoded with this state.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Forget captured keyframe streams.
    pub fn reset(&mut self) {
        self.indices = None;
        self.uvs = None;
        self.colors = None;
    }

    pub(crate) fn mark_decoded(&mut self) {
        self.frames_decoded += 1;
    }
}

/// Decode one entropy-coded frame into `out`, reusing its allocations.
///
/// On error `out` holds partial data and must not be displayed.
pub fn decode_frame(state: &mut DecodeState, bytes: &[u8], out: &mut MeshFrame) -> Result<()> {
    let mut cursor = Cursor::new(bytes);
    let header = FrameHeader::read(&mut cursor)?;
    if header.magic != FRAME_MAGIC {
        error!(
            "Incompatible bitstream found: magic {:#010x}, expected {:#010x}",
            header.magic, FRAME_MAGIC
        );
        return Err(Error::InvalidMagic {
            expected: FRAME_MAGIC,
            found: header.magic,
        });
    }
    out.bounding_box = read_frame_extras(&mut cursor, &mut out.batches)?;

    let start = cursor.position() as usize;
    let payload = bytes
        .get(start..start + header.payload_size as usize)
        .ok_or(Error::UnexpectedEof(bytes.len() as u64))?;
    let payload_bits = payload.len() as u64 * 8;
    let vertex_count = header.vertex_count as usize;
    let index_count = header.index_count as usize;

    let mut reader = BitReader::new(payload);
    let desc = StreamDescription::read(&mut reader);

    let mut tables: [Option<HuffmanDecodeTable>; TableId::COUNT] = Default::default();
    for table in TableId::ALL {
        if desc.is_coded(table) {
            let t = HuffmanDecodeTable::read(&mut reader)?;
            if t.symbol_count() != table.symbol_count() {
                return Err(Error::InvalidHuffmanTable(format!(
                    "{} table has {} symbols, expected {}",
                    table.name(),
                    t.symbol_count(),
                    table.symbol_count()
                )));
            }
            tables[table.index()] = Some(t);
        }
    }
    let table = |id: TableId| {
        tables[id.index()]
            .as_ref()
            .ok_or_else(|| Error::corrupt(format!("missing {} table", id.name())))
    };

    // Every coded element takes at least one bit per symbol.
    if vertex_count as u64 * 3 > payload_bits
        || (desc.is_coded(TableId::Indices) && index_count as u64 > payload_bits)
    {
        return Err(Error::corrupt(format!(
            "{vertex_count} vertices and {index_count} indices cannot fit {} payload bytes",
            payload.len()
        )));
    }

    if desc.constant_indices {
        let kept = state.indices.as_ref().ok_or(Error::MissingKeyframe { stream: "indices" })?;
        if kept.len() != index_count {
            return Err(Error::corrupt("constant index count differs from keyframe"));
        }
        out.indices.clear();
        out.indices.extend_from_slice(kept);
    } else {
        decode_indices(&mut reader, table(TableId::Indices)?, index_count, &mut out.indices)?;
    }

    decode_positions(
        &mut reader,
        table(TableId::Positions)?,
        table(TableId::PredictionModes)?,
        &out.indices,
        vertex_count,
        &mut out.positions,
    )?;

    out.colors.clear();
    if desc.has_color0 {
        if desc.constant_color0 {
            let kept = state.colors.as_ref().ok_or(Error::MissingKeyframe { stream: "color0" })?;
            check_kept_len(kept.len(), vertex_count, "color0")?;
            out.colors.extend_from_slice(kept);
        } else {
            decode_colors(&mut reader, table(TableId::Colors)?, vertex_count, &mut out.colors)?;
        }
    }

    out.tangents_x.clear();
    if desc.has_tangent_x {
        decode_normals(&mut reader, table(TableId::TangentX)?, vertex_count, &mut out.tangents_x)?;
    }
    out.tangents_z.clear();
    if desc.has_tangent_z {
        decode_normals(&mut reader, table(TableId::TangentZ)?, vertex_count, &mut out.tangents_z)?;
    }

    out.texture_coordinates.clear();
    if desc.has_uv0 {
        if desc.constant_uv0 {
            let kept = state.uvs.as_ref().ok_or(Error::MissingKeyframe { stream: "uv0" })?;
            check_kept_len(kept.len(), vertex_count, "uv0")?;
            out.texture_coordinates.extend_from_slice(kept);
        } else {
            decode_uvs(&mut reader, table(TableId::Uvs)?, vertex_count, &mut out.texture_coordinates)?;
        }
    }

    out.motion_vectors.clear();
    if desc.has_motion_vectors {
        decode_motion_vectors(&mut reader, table(TableId::MotionVectors)?, vertex_count, &mut out.motion_vectors)?;
    }

    if reader.is_overrun() {
        return Err(Error::corrupt("payload ended before all streams were decoded"));
    }

    if state.constants.indices && !desc.constant_indices {
        state.indices = Some(out.indices.clone());
    }
    if state.constants.color0 && desc.has_color0 && !desc.constant_color0 {
        state.colors = Some(out.colors.clone());
    }
    if state.constants.uv0 && desc.has_uv0 && !desc.constant_uv0 {
        state.uvs = Some(out.texture_coordinates.clone());
    }

    out.vertex_info = VertexInfo {
        has_tangent_x: desc.has_tangent_x,
        has_tangent_z: desc.has_tangent_z,
        has_uv0: desc.has_uv0,
        has_color0: desc.has_color0,
        has_motion_vectors: desc.has_motion_vectors,
        constant_uv0: desc.constant_uv0 || state.constants.uv0,
        constant_color0: desc.constant_color0 || state.constants.color0,
        constant_indices: desc.constant_indices || state.constants.indices,
    };
    state.mark_decoded();
    Ok(())
}

fn check_kept_len(kept: usize, vertex_count: usize, stream: &str) -> Result<()> {
    if kept != vertex_count {
        return Err(Error::corrupt(format!(
            "constant {stream} stream has {kept} elements for {vertex_count} vertices"
        )));
    }
    Ok(())
}

fn decode_indices(reader: &mut BitReader<'_>, table: &HuffmanDecodeTable, count: usize, out: &mut Vec<u32>) -> Result<()> {
    out.clear();
    out.reserve(count);
    let mut history = History::<u32, INDEX_HISTORY>::new(0);
    for _ in 0..count {
        let residual = read_signed(table, reader)?;
        let value = history.latest().wrapping_add(residual as u32);
        out.push(value);
        history.push(value);
    }
    Ok(())
}

fn check_precision(precision: f32, stream: &str) -> Result<()> {
    if precision > 0.0 && precision.is_finite() {
        Ok(())
    } else {
        Err(Error::corrupt(format!("{stream} precision {precision} is invalid")))
    }
}

fn read_ivec3(reader: &mut BitReader<'_>, table: &HuffmanDecodeTable) -> Result<IVec3> {
    Ok(IVec3::new(
        read_signed(table, reader)?,
        read_signed(table, reader)?,
        read_signed(table, reader)?,
    ))
}

fn decode_positions(
    reader: &mut BitReader<'_>,
    table: &HuffmanDecodeTable,
    modes: &HuffmanDecodeTable,
    indices: &[u32],
    vertex_count: usize,
    out: &mut Vec<Vec3>,
) -> Result<()> {
    let header = PositionStreamHeader::read(reader);
    check_precision(header.precision, "position")?;
    let quantizer = Vec3Quantizer::new(header.precision);

    out.clear();
    out.resize(vertex_count, Vec3::ZERO);
    let mut decode_vertex =
        |reader: &mut BitReader<'_>, predictor: &mut VertexPredictor, corner: usize, index: usize| -> Result<()> {
            let mode = modes.decode(reader)?;
            let value = predictor.predict(corner, mode).wrapping_add(read_ivec3(reader, table)?);
            predictor.push_new(index as u32, value);
            out[index] = quantizer.dequantize(value.wrapping_add(header.translation));
            Ok(())
        };

    let mut predictor = VertexPredictor::new();
    let mut next_unseen = 0usize;
    for triangle in indices.chunks(3) {
        predictor.begin_triangle(triangle);
        for (corner, &index) in triangle.iter().enumerate() {
            let i = index as usize;
            if i < next_unseen {
                predictor.push_revisit(index);
                continue;
            }
            if i != next_unseen || i >= vertex_count {
                return Err(Error::corrupt(format!(
                    "index {i} breaks first-use order (next vertex {next_unseen}, {vertex_count} vertices)"
                )));
            }
            decode_vertex(reader, &mut predictor, corner, i)?;
            next_unseen += 1;
        }
    }
    predictor.begin_triangle(&[]);
    for i in next_unseen..vertex_count {
        decode_vertex(reader, &mut predictor, 0, i)?;
    }
    Ok(())
}

fn decode_colors(reader: &mut BitReader<'_>, table: &HuffmanDecodeTable, count: usize, out: &mut Vec<Color>) -> Result<()> {
    out.reserve(count);
    let mut history = History::<[u8; 4], COLOR_HISTORY>::new([128, 128, 128, 255]);
    for _ in 0..count {
        let prediction = history.latest();
        let value = if reader.read_bool() {
            prediction
        } else {
            let mut value = [0u8; 4];
            for (v, p) in value.iter_mut().zip(prediction) {
                let channel = i32::from(p) + read_signed(table, reader)?;
                *v = u8::try_from(channel)
                    .map_err(|_| Error::corrupt(format!("color channel {channel} out of range")))?;
            }
            value
        };
        out.push(Color::from_array(value));
        history.push(value);
    }
    Ok(())
}

fn decode_normals(reader: &mut BitReader<'_>, table: &HuffmanDecodeTable, count: usize, out: &mut Vec<PackedNormal>) -> Result<()> {
    out.reserve(count);
    let mut history = History::<[u8; 4], NORMAL_HISTORY>::new(PackedNormal::ZERO.to_array());
    for _ in 0..count {
        let mut value = history.latest();
        for v in value.iter_mut() {
            let symbol = table.decode(reader)?;
            *v = v.wrapping_add(symbol as u8);
        }
        out.push(PackedNormal::from_array(value));
        history.push(value);
    }
    Ok(())
}

fn decode_uvs(reader: &mut BitReader<'_>, table: &HuffmanDecodeTable, count: usize, out: &mut Vec<Vec2>) -> Result<()> {
    let header = UvStreamHeader::read(reader);
    let range_ok = header.range.x > 0.0 && header.range.y > 0.0 && header.range.is_finite();
    if header.bits >= 32 || !range_ok {
        return Err(Error::corrupt(format!(
            "uv stream header has {} bits over range {:?}",
            header.bits, header.range
        )));
    }
    let quantizer = Vec2Quantizer::with_range(header.range, header.bits);

    out.reserve(count);
    let mut history = History::<IVec2, UV_HISTORY>::new(IVec2::ZERO);
    for _ in 0..count {
        let residual = IVec2::new(read_signed(table, reader)?, read_signed(table, reader)?);
        let value = history.latest().wrapping_add(residual);
        out.push(quantizer.dequantize(value));
        history.push(value);
    }
    Ok(())
}

fn decode_motion_vectors(reader: &mut BitReader<'_>, table: &HuffmanDecodeTable, count: usize, out: &mut Vec<Vec3>) -> Result<()> {
    let header = MotionVectorStreamHeader::read(reader);
    check_precision(header.precision, "motion vector")?;
    let quantizer = Vec3Quantizer::new(header.precision);

    out.reserve(count);
    let mut history = History::<IVec3, MOTION_VECTOR_HISTORY>::new(IVec3::ZERO);
    for _ in 0..count {
        let value = history.latest().wrapping_add(read_ivec3(reader, table)?);
        out.push(quantizer.dequantize(value));
        history.push(value);
    }
    Ok(())
}
