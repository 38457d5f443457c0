//! Uncompressed frame storage.
//!
//! Layout: magic, vertex count, index count (u32 LE), one byte of vertex
//! info flags, the batch list and bounding box, then every present stream as
//! a plain little-endian array.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytemuck::Pod;

use super::encoder::{frame_bounds, EncodeStatistics};
use super::frame::{read_frame_extras, write_frame_extras};
use crate::geom::{MeshFrame, VertexInfo};
use crate::util::{Error, Result};

/// Magic tag opening every raw frame ("GCR1").
pub const RAW_FRAME_MAGIC: u32 = 0x3152_4347;

fn info_to_bits(info: &VertexInfo) -> u8 {
    [
        info.has_tangent_x,
        info.has_tangent_z,
        info.has_uv0,
        info.has_color0,
        info.has_motion_vectors,
        info.constant_uv0,
        info.constant_color0,
        info.constant_indices,
    ]
    .iter()
    .enumerate()
    .fold(0u8, |acc, (i, &b)| acc | (u8::from(b) << i))
}

fn info_from_bits(bits: u8) -> VertexInfo {
    let bit = |i: u32| bits & (1 << i) != 0;
    VertexInfo {
        has_tangent_x: bit(0),
        has_tangent_z: bit(1),
        has_uv0: bit(2),
        has_color0: bit(3),
        has_motion_vectors: bit(4),
        constant_uv0: bit(5),
        constant_color0: bit(6),
        constant_indices: bit(7),
    }
}

/// Append `mesh` uncompressed to `out`.
pub fn encode_frame(mesh: &MeshFrame, out: &mut Vec<u8>) -> Result<EncodeStatistics> {
    if let Err(msg) = mesh.validate() {
        panic!("mesh frame violates encoder preconditions: {msg}");
    }
    let start = out.len();
    let info = &mesh.vertex_info;
    out.write_u32::<LittleEndian>(RAW_FRAME_MAGIC)?;
    out.write_u32::<LittleEndian>(mesh.positions.len() as u32)?;
    out.write_u32::<LittleEndian>(mesh.indices.len() as u32)?;
    out.write_u8(info_to_bits(info))?;
    write_frame_extras(out, &mesh.batches, &frame_bounds(mesh))?;

    for &i in &mesh.indices {
        out.write_u32::<LittleEndian>(i)?;
    }
    write_floats(out, bytemuck::cast_slice(&mesh.positions))?;
    if info.has_tangent_x {
        out.extend_from_slice(bytemuck::cast_slice(&mesh.tangents_x));
    }
    if info.has_tangent_z {
        out.extend_from_slice(bytemuck::cast_slice(&mesh.tangents_z));
    }
    if info.has_uv0 {
        write_floats(out, bytemuck::cast_slice(&mesh.texture_coordinates))?;
    }
    if info.has_color0 {
        out.extend_from_slice(bytemuck::cast_slice(&mesh.colors));
    }
    if info.has_motion_vectors {
        write_floats(out, bytemuck::cast_slice(&mesh.motion_vectors))?;
    }

    let coded_bytes = out.len() - start;
    Ok(EncodeStatistics {
        vertex_count: mesh.positions.len(),
        raw_bytes: mesh.raw_size_bytes(),
        coded_bytes,
        ..Default::default()
    })
}

fn write_floats(out: &mut Vec<u8>, values: &[f32]) -> Result<()> {
    for &v in values {
        out.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

/// Read `count` little-endian f32 values and reinterpret them as `T`.
fn read_floats<T: Pod>(r: &mut Cursor<&[u8]>, count: usize, lanes: usize, out: &mut Vec<T>) -> Result<()> {
    check_remaining(r, count * lanes * 4)?;
    let mut floats = vec![0f32; count * lanes];
    r.read_f32_into::<LittleEndian>(&mut floats)?;
    out.clear();
    out.extend_from_slice(bytemuck::cast_slice(&floats));
    Ok(())
}

fn read_bytes<T: Pod>(r: &mut Cursor<&[u8]>, count: usize, out: &mut Vec<T>) -> Result<()> {
    let len = count * std::mem::size_of::<T>();
    check_remaining(r, len)?;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    *out = bytemuck::pod_collect_to_vec(&bytes);
    Ok(())
}

fn check_remaining(r: &Cursor<&[u8]>, len: usize) -> Result<()> {
    let remaining = (r.get_ref().len() as u64).saturating_sub(r.position());
    if (len as u64) > remaining {
        return Err(Error::UnexpectedEof(r.position()));
    }
    Ok(())
}

/// Decode a raw frame into `out`.
pub fn decode_frame(bytes: &[u8], out: &mut MeshFrame) -> Result<()> {
    let mut r = Cursor::new(bytes);
    let eof = |e| Error::from_read(e, 0);
    let magic = r.read_u32::<LittleEndian>().map_err(eof)?;
    if magic != RAW_FRAME_MAGIC {
        tracing::error!("Incompatible raw frame: magic {magic:#010x}");
        return Err(Error::InvalidMagic {
            expected: RAW_FRAME_MAGIC,
            found: magic,
        });
    }
    let vertex_count = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
    let index_count = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
    let info = info_from_bits(r.read_u8().map_err(eof)?);
    out.bounding_box = read_frame_extras(&mut r, &mut out.batches)?;

    check_remaining(&r, index_count * 4)?;
    out.indices.clear();
    out.indices.resize(index_count, 0);
    r.read_u32_into::<LittleEndian>(&mut out.indices)?;

    read_floats(&mut r, vertex_count, 3, &mut out.positions)?;

    out.tangents_x.clear();
    if info.has_tangent_x {
        read_bytes(&mut r, vertex_count, &mut out.tangents_x)?;
    }
    out.tangents_z.clear();
    if info.has_tangent_z {
        read_bytes(&mut r, vertex_count, &mut out.tangents_z)?;
    }
    out.texture_coordinates.clear();
    if info.has_uv0 {
        read_floats(&mut r, vertex_count, 2, &mut out.texture_coordinates)?;
    }
    out.colors.clear();
    if info.has_color0 {
        read_bytes(&mut r, vertex_count, &mut out.colors)?;
    }
    out.motion_vectors.clear();
    if info.has_motion_vectors {
        read_floats(&mut r, vertex_count, 3, &mut out.motion_vectors)?;
    }
    out.vertex_info = info;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Color, PackedNormal};
    use crate::util::{Vec2, Vec3};

    fn mesh() -> MeshFrame {
        let mut m = MeshFrame {
            positions: vec![Vec3::new(0.1234, 5.0, -3.0), Vec3::ONE, Vec3::NEG_ONE],
            texture_coordinates: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
            tangents_x: vec![PackedNormal::ZERO; 3],
            colors: vec![Color::WHITE, Color::new(1, 2, 3, 4), Color::default()],
            indices: vec![0, 1, 2],
            vertex_info: VertexInfo {
                has_tangent_x: true,
                has_uv0: true,
                has_color0: true,
                constant_indices: true,
                ..Default::default()
            },
            ..Default::default()
        };
        m.update_bounds();
        m
    }

    #[test]
    fn test_raw_roundtrip_is_exact() {
        let m = mesh();
        let mut bytes = Vec::new();
        let stats = encode_frame(&m, &mut bytes).expect("encode");
        assert_eq!(stats.coded_bytes, bytes.len());

        let mut out = MeshFrame::new();
        decode_frame(&bytes, &mut out).expect("decode");
        assert_eq!(out, m);
    }

    #[test]
    fn test_raw_truncated() {
        let mut bytes = Vec::new();
        encode_frame(&mesh(), &mut bytes).expect("encode");
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            decode_frame(&bytes, &mut MeshFrame::new()),
            Err(Error::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_info_bits() {
        let info = mesh().vertex_info;
        assert_eq!(info_from_bits(info_to_bits(&info)), info);
    }
}
