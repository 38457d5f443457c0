//! Blending between two decoded frames of identical topology.

use super::mesh_data::{Color, MeshFrame, PackedNormal};
use crate::util::BBox3f;

#[inline]
fn blend_bytes(a: [u8; 4], b: [u8; 4], scaled: u32, one_minus: u32) -> [u8; 4] {
    let mut out = [0u8; 4];
    for ((o, a), b) in out.iter_mut().zip(a).zip(b) {
        *o = ((u32::from(a) * one_minus + u32::from(b) * scaled) / 255) as u8;
    }
    out
}

/// Blend two packed normals with an 8-bit fixed-point factor.
#[inline]
pub fn interpolate_packed_normal(a: PackedNormal, b: PackedNormal, scaled: u32) -> PackedNormal {
    PackedNormal::from_array(blend_bytes(a.to_array(), b.to_array(), scaled, 255 - scaled))
}

/// Blend two colors with an 8-bit fixed-point factor.
#[inline]
pub fn interpolate_color(a: Color, b: Color, scaled: u32) -> Color {
    Color::from_array(blend_bytes(a.to_array(), b.to_array(), scaled, 255 - scaled))
}

/// Write the blend of `a` and `b` at `factor` into `out`.
///
/// Positions, UVs and motion vectors blend linearly; tangents and colors
/// blend in 8-bit fixed point. Connectivity, batches and attribute presence
/// come from `a`. Both frames must have the same vertex count.
pub fn interpolate_frames(a: &MeshFrame, b: &MeshFrame, factor: f32, out: &mut MeshFrame) {
    assert_eq!(a.vertex_count(), b.vertex_count(), "interpolating frames of different topology");
    let t = factor.clamp(0.0, 1.0);
    let scaled = (t * 255.0) as u32;

    out.positions.clear();
    out.positions
        .extend(a.positions.iter().zip(&b.positions).map(|(p, q)| p.lerp(*q, t)));

    out.texture_coordinates.clear();
    if a.texture_coordinates.len() == b.texture_coordinates.len() {
        out.texture_coordinates.extend(
            a.texture_coordinates
                .iter()
                .zip(&b.texture_coordinates)
                .map(|(p, q)| p.lerp(*q, t)),
        );
    } else {
        out.texture_coordinates.extend_from_slice(&a.texture_coordinates);
    }

    out.motion_vectors.clear();
    if a.motion_vectors.len() == b.motion_vectors.len() {
        out.motion_vectors
            .extend(a.motion_vectors.iter().zip(&b.motion_vectors).map(|(p, q)| p.lerp(*q, t)));
    } else {
        out.motion_vectors.extend_from_slice(&a.motion_vectors);
    }

    let blend_normals = |dst: &mut Vec<PackedNormal>, x: &[PackedNormal], y: &[PackedNormal]| {
        dst.clear();
        if x.len() == y.len() {
            dst.extend(x.iter().zip(y).map(|(p, q)| interpolate_packed_normal(*p, *q, scaled)));
        } else {
            dst.extend_from_slice(x);
        }
    };
    blend_normals(&mut out.tangents_x, &a.tangents_x, &b.tangents_x);
    blend_normals(&mut out.tangents_z, &a.tangents_z, &b.tangents_z);

    out.colors.clear();
    if a.colors.len() == b.colors.len() {
        out.colors
            .extend(a.colors.iter().zip(&b.colors).map(|(p, q)| interpolate_color(*p, *q, scaled)));
    } else {
        out.colors.extend_from_slice(&a.colors);
    }

    out.indices.clear();
    out.indices.extend_from_slice(&a.indices);
    out.batches.clear();
    out.batches.extend_from_slice(&a.batches);
    out.bounding_box = if a.bounding_box.is_empty() || b.bounding_box.is_empty() {
        a.bounding_box
    } else {
        BBox3f::new(
            a.bounding_box.min.lerp(b.bounding_box.min, t),
            a.bounding_box.max.lerp(b.bounding_box.max, t),
        )
    };
    out.vertex_info = a.vertex_info;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{Vec2, Vec3};

    fn frame(offset: f32, shade: u8) -> MeshFrame {
        let mut m = MeshFrame {
            positions: vec![Vec3::splat(offset), Vec3::splat(offset + 1.0)],
            texture_coordinates: vec![Vec2::splat(offset); 2],
            colors: vec![Color::new(shade, shade, shade, 255); 2],
            tangents_x: vec![PackedNormal::new(shade, 0, 255, 255); 2],
            indices: vec![0, 1, 0],
            ..Default::default()
        };
        m.update_bounds();
        m
    }

    #[test]
    fn test_endpoints() {
        let a = frame(0.0, 0);
        let b = frame(2.0, 255);
        let mut out = MeshFrame::new();

        interpolate_frames(&a, &b, 0.0, &mut out);
        assert_eq!(out.positions, a.positions);
        assert_eq!(out.colors, a.colors);

        interpolate_frames(&a, &b, 1.0, &mut out);
        assert_eq!(out.positions, b.positions);
        assert_eq!(out.colors, b.colors);
        assert_eq!(out.tangents_x, b.tangents_x);
    }

    #[test]
    fn test_midpoint() {
        let a = frame(0.0, 0);
        let b = frame(2.0, 254);
        let mut out = MeshFrame::new();
        interpolate_frames(&a, &b, 0.5, &mut out);
        assert_eq!(out.positions[0], Vec3::ONE);
        assert_eq!(out.texture_coordinates[1], Vec2::ONE);
        // 254 * 127 / 255
        assert_eq!(out.colors[0].r, 126);
        assert_eq!(out.colors[0].a, 255);
        assert_eq!(out.bounding_box.min, Vec3::ONE);
        assert_eq!(out.indices, a.indices);
    }
}
