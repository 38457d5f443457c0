//! Coded frame layout shared by the encoder and decoder.
//!
//! A coded frame is:
//!
//! ```text
//! FrameHeader   magic, payload_size, index_count, vertex_count (u32 LE each)
//! batches       count: u32, then {start_index, num_triangles, material_index} u32 each
//! bounding box  6 x f32 (min.xyz, max.xyz)
//! payload       bitstream of payload_size bytes
//! ```
//!
//! The payload opens with an 8-bit [`StreamDescription`], followed by the
//! serialized Huffman table of every coded stream, followed by the streams
//! themselves in [`TableId::ALL`] order. Prediction mode symbols have no
//! stream of their own; each one precedes its vertex in the position stream.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::bitstream::{BitReader, BitWriter};
use super::huffman::{BYTE_SYMBOL_COUNT, SIGNED_SYMBOL_COUNT};
use super::prediction::PREDICTION_MODE_COUNT;
use crate::geom::{BatchInfo, VertexInfo};
use crate::util::{BBox3f, Error, IVec3, Result, Vec2};

/// Magic tag opening every entropy-coded frame ("GCV1").
pub const FRAME_MAGIC: u32 = 0x3156_4347;

/// Size of [`FrameHeader`] on disk.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Fixed-size header in front of every coded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    /// Size of the bitstream payload in bytes.
    pub payload_size: u32,
    pub index_count: u32,
    pub vertex_count: u32,
}

impl FrameHeader {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(self.magic)?;
        w.write_u32::<LittleEndian>(self.payload_size)?;
        w.write_u32::<LittleEndian>(self.index_count)?;
        w.write_u32::<LittleEndian>(self.vertex_count)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let mut read = || r.read_u32::<LittleEndian>().map_err(|e| Error::from_read(e, 0));
        Ok(Self {
            magic: read()?,
            payload_size: read()?,
            index_count: read()?,
            vertex_count: read()?,
        })
    }
}

/// Write the uncompressed batch list and bounding box.
pub fn write_frame_extras<W: Write>(w: &mut W, batches: &[BatchInfo], bbox: &BBox3f) -> Result<()> {
    w.write_u32::<LittleEndian>(batches.len() as u32)?;
    for b in batches {
        w.write_u32::<LittleEndian>(b.start_index)?;
        w.write_u32::<LittleEndian>(b.num_triangles)?;
        w.write_u32::<LittleEndian>(b.material_index)?;
    }
    for v in bbox.to_array() {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

/// Read the uncompressed batch list and bounding box into `batches`.
pub fn read_frame_extras(r: &mut Cursor<&[u8]>, batches: &mut Vec<BatchInfo>) -> Result<BBox3f> {
    let eof = |e: std::io::Error, pos: u64| Error::from_read(e, pos);
    let count = r.read_u32::<LittleEndian>().map_err(|e| eof(e, r.position()))? as usize;
    let remaining = r.get_ref().len() as u64 - r.position().min(r.get_ref().len() as u64);
    if count as u64 * 12 > remaining {
        return Err(Error::UnexpectedEof(r.position()));
    }
    batches.clear();
    batches.reserve(count);
    for _ in 0..count {
        let mut field = || r.read_u32::<LittleEndian>();
        let batch = BatchInfo {
            start_index: field()?,
            num_triangles: field()?,
            material_index: field()?,
        };
        batches.push(batch);
    }
    let mut bbox = [0f32; 6];
    r.read_f32_into::<LittleEndian>(&mut bbox)
        .map_err(|e| eof(e, r.position()))?;
    Ok(BBox3f::from_array(bbox))
}

/// The eight flag bits at the start of every payload.
///
/// The `constant_*` bits mark streams omitted from this frame because the
/// track stores them once, in its keyframe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamDescription {
    pub has_tangent_x: bool,
    pub has_tangent_z: bool,
    pub has_uv0: bool,
    pub has_color0: bool,
    pub has_motion_vectors: bool,
    pub constant_uv0: bool,
    pub constant_color0: bool,
    pub constant_indices: bool,
}

impl StreamDescription {
    /// Description for `info`; constant streams are omitted unless `keyframe`.
    pub fn for_frame(info: &VertexInfo, keyframe: bool) -> Self {
        Self {
            has_tangent_x: info.has_tangent_x,
            has_tangent_z: info.has_tangent_z,
            has_uv0: info.has_uv0,
            has_color0: info.has_color0,
            has_motion_vectors: info.has_motion_vectors,
            constant_uv0: info.has_uv0 && info.constant_uv0 && !keyframe,
            constant_color0: info.has_color0 && info.constant_color0 && !keyframe,
            constant_indices: info.constant_indices && !keyframe,
        }
    }

    pub fn write(&self, w: &mut BitWriter) {
        for bit in self.bits() {
            w.write_bool(bit);
        }
    }

    pub fn read(r: &mut BitReader<'_>) -> Self {
        r.refill();
        let mut next = || r.read_no_refill(1) != 0;
        Self {
            has_tangent_x: next(),
            has_tangent_z: next(),
            has_uv0: next(),
            has_color0: next(),
            has_motion_vectors: next(),
            constant_uv0: next(),
            constant_color0: next(),
            constant_indices: next(),
        }
    }

    fn bits(&self) -> [bool; 8] {
        [
            self.has_tangent_x,
            self.has_tangent_z,
            self.has_uv0,
            self.has_color0,
            self.has_motion_vectors,
            self.constant_uv0,
            self.constant_color0,
            self.constant_indices,
        ]
    }

    /// Whether the stream behind `table` is coded in this frame.
    pub fn is_coded(&self, table: TableId) -> bool {
        match table {
            TableId::Indices => !self.constant_indices,
            TableId::Positions | TableId::PredictionModes => true,
            TableId::Colors => self.has_color0 && !self.constant_color0,
            TableId::TangentX => self.has_tangent_x,
            TableId::TangentZ => self.has_tangent_z,
            TableId::Uvs => self.has_uv0 && !self.constant_uv0,
            TableId::MotionVectors => self.has_motion_vectors,
        }
    }
}

/// Identifies one Huffman table, and with it one coded stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableId {
    Indices,
    Positions,
    /// Per-vertex choice of position predictor, coded with the positions.
    PredictionModes,
    Colors,
    TangentX,
    TangentZ,
    Uvs,
    MotionVectors,
}

impl TableId {
    /// All tables in serialization and stream order.
    pub const ALL: [TableId; 8] = [
        TableId::Indices,
        TableId::Positions,
        TableId::PredictionModes,
        TableId::Colors,
        TableId::TangentX,
        TableId::TangentZ,
        TableId::Uvs,
        TableId::MotionVectors,
    ];

    pub const COUNT: usize = Self::ALL.len();

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Alphabet size of the table.
    pub fn symbol_count(self) -> usize {
        match self {
            TableId::TangentX | TableId::TangentZ => BYTE_SYMBOL_COUNT,
            TableId::PredictionModes => PREDICTION_MODE_COUNT,
            _ => SIGNED_SYMBOL_COUNT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TableId::Indices => "indices",
            TableId::Positions => "positions",
            TableId::PredictionModes => "prediction_modes",
            TableId::Colors => "colors",
            TableId::TangentX => "tangent_x",
            TableId::TangentZ => "tangent_z",
            TableId::Uvs => "uv0",
            TableId::MotionVectors => "motion_vectors",
        }
    }
}

/// Header in front of the position stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionStreamHeader {
    pub precision: f32,
    /// Quantized bounding box center subtracted from every vertex.
    pub translation: IVec3,
}

/// Header in front of the UV stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UvStreamHeader {
    pub bits: u32,
    pub range: Vec2,
}

/// Header in front of the motion vector stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionVectorStreamHeader {
    pub precision: f32,
}

impl PositionStreamHeader {
    pub fn read(r: &mut BitReader<'_>) -> Self {
        let precision = r.read_f32();
        let x = r.read(32) as i32;
        let y = r.read(32) as i32;
        let z = r.read(32) as i32;
        Self {
            precision,
            translation: IVec3::new(x, y, z),
        }
    }
}

impl UvStreamHeader {
    pub fn read(r: &mut BitReader<'_>) -> Self {
        let bits = r.read(32);
        let x = r.read_f32();
        let y = r.read_f32();
        Self {
            bits,
            range: Vec2::new(x, y),
        }
    }
}

impl MotionVectorStreamHeader {
    pub fn read(r: &mut BitReader<'_>) -> Self {
        Self {
            precision: r.read_f32(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec3;

    #[test]
    fn test_header_layout() {
        let h = FrameHeader {
            magic: FRAME_MAGIC,
            payload_size: 7,
            index_count: 3,
            vertex_count: 9,
        };
        let mut bytes = Vec::new();
        h.write(&mut bytes).expect("write");
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE);
        assert_eq!(&bytes[0..4], b"GCV1");
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(FrameHeader::read(&mut bytes.as_slice()).expect("read"), h);
    }

    #[test]
    fn test_truncated_header() {
        let bytes = [0u8; 10];
        assert!(matches!(
            FrameHeader::read(&mut &bytes[..]),
            Err(Error::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_frame_extras() {
        let batches = vec![BatchInfo {
            start_index: 0,
            num_triangles: 4,
            material_index: 2,
        }];
        let bbox = BBox3f::new(Vec3::splat(-1.0), Vec3::ONE);
        let mut bytes = Vec::new();
        write_frame_extras(&mut bytes, &batches, &bbox).expect("write");
        assert_eq!(bytes.len(), 4 + 12 + 24);

        let mut out = Vec::new();
        let mut cursor = Cursor::new(bytes.as_slice());
        assert_eq!(read_frame_extras(&mut cursor, &mut out).expect("read"), bbox);
        assert_eq!(out, batches);
    }

    #[test]
    fn test_description_bits() {
        let info = VertexInfo {
            has_uv0: true,
            has_color0: true,
            constant_uv0: true,
            constant_indices: true,
            ..Default::default()
        };
        let key = StreamDescription::for_frame(&info, true);
        assert!(key.is_coded(TableId::Uvs) && key.is_coded(TableId::Indices));

        let other = StreamDescription::for_frame(&info, false);
        assert!(!other.is_coded(TableId::Uvs));
        assert!(!other.is_coded(TableId::Indices));
        assert!(other.is_coded(TableId::Colors));

        let mut w = BitWriter::new();
        other.write(&mut w);
        assert_eq!(w.bit_len(), 8);
        let bytes = w.into_bytes();
        assert_eq!(StreamDescription::read(&mut BitReader::new(&bytes)), other);
    }
}
