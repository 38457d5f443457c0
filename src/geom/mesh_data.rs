//! Decoded per-frame mesh data.

use bytemuck::{Pod, Zeroable};

use crate::util::{BBox3f, Vec2, Vec3};

/// Tangent-space vector packed into four unsigned bytes.
///
/// Each component maps `[-1, 1]` onto `[0, 255]`; 128 is zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct PackedNormal {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub w: u8,
}

impl PackedNormal {
    /// The zero vector.
    pub const ZERO: Self = Self::new(128, 128, 128, 128);

    #[inline]
    pub const fn new(x: u8, y: u8, z: u8, w: u8) -> Self {
        Self { x, y, z, w }
    }

    /// Pack a unit vector, with `w` carrying the binormal sign.
    pub fn from_vec3(v: Vec3, w: f32) -> Self {
        #[inline]
        fn pack(c: f32) -> u8 {
            ((c.clamp(-1.0, 1.0) * 127.5 + 127.5).round()) as u8
        }
        Self::new(pack(v.x), pack(v.y), pack(v.z), pack(w))
    }

    /// Unpack the xyz components.
    pub fn to_vec3(self) -> Vec3 {
        #[inline]
        fn unpack(c: u8) -> f32 {
            c as f32 / 127.5 - 1.0
        }
        Vec3::new(unpack(self.x), unpack(self.y), unpack(self.z))
    }

    #[inline]
    pub fn to_array(self) -> [u8; 4] {
        [self.x, self.y, self.z, self.w]
    }

    #[inline]
    pub fn from_array(a: [u8; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }
}

/// 8-bit RGBA vertex color.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Self = Self::new(255, 255, 255, 255);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[inline]
    pub fn from_array(a: [u8; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }
}

/// Contiguous index range drawn with a single material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BatchInfo {
    /// First index of the batch in the index buffer.
    pub start_index: u32,
    pub num_triangles: u32,
    pub material_index: u32,
}

/// Which optional attribute streams a frame carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexInfo {
    pub has_tangent_x: bool,
    pub has_tangent_z: bool,
    pub has_uv0: bool,
    pub has_color0: bool,
    pub has_motion_vectors: bool,
    /// UVs are identical in every frame of the track.
    pub constant_uv0: bool,
    /// Colors are identical in every frame of the track.
    pub constant_color0: bool,
    /// Index buffer is identical in every frame of the track.
    pub constant_indices: bool,
}

impl VertexInfo {
    /// Constant-stream flags packed as persisted in track files.
    pub fn constant_streams(&self) -> ConstantStreams {
        ConstantStreams {
            indices: self.constant_indices,
            uv0: self.constant_uv0 && self.has_uv0,
            color0: self.constant_color0 && self.has_color0,
        }
    }
}

/// Streams a track stores only in its first frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConstantStreams {
    pub indices: bool,
    pub uv0: bool,
    pub color0: bool,
}

impl ConstantStreams {
    pub fn any(&self) -> bool {
        self.indices || self.uv0 || self.color0
    }

    pub fn to_bits(self) -> u8 {
        u8::from(self.indices) | u8::from(self.uv0) << 1 | u8::from(self.color0) << 2
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            indices: bits & 1 != 0,
            uv0: bits & 2 != 0,
            color0: bits & 4 != 0,
        }
    }
}

/// One frame of vertex-cache geometry.
///
/// Attribute arrays are either empty or hold one element per vertex, as
/// announced by [`MeshFrame::vertex_info`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshFrame {
    pub positions: Vec<Vec3>,
    pub texture_coordinates: Vec<Vec2>,
    pub tangents_x: Vec<PackedNormal>,
    pub tangents_z: Vec<PackedNormal>,
    pub colors: Vec<Color>,
    pub motion_vectors: Vec<Vec3>,
    /// Triangle list.
    pub indices: Vec<u32>,
    pub batches: Vec<BatchInfo>,
    pub bounding_box: BBox3f,
    pub vertex_info: VertexInfo,
}

impl MeshFrame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Get number of indices.
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Empty every array while keeping allocations for reuse.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.texture_coordinates.clear();
        self.tangents_x.clear();
        self.tangents_z.clear();
        self.colors.clear();
        self.motion_vectors.clear();
        self.indices.clear();
        self.batches.clear();
        self.bounding_box = BBox3f::EMPTY;
        self.vertex_info = VertexInfo::default();
    }

    /// Recompute the bounding box from positions.
    pub fn update_bounds(&mut self) {
        self.bounding_box = BBox3f::from_points(&self.positions);
    }

    /// Whether two frames share vertex count and index buffer.
    pub fn same_topology(&self, other: &MeshFrame) -> bool {
        self.positions.len() == other.positions.len() && self.indices == other.indices
    }

    /// Size of the frame's attribute data if stored uncompressed.
    pub fn raw_size_bytes(&self) -> usize {
        use std::mem::size_of;
        self.positions.len() * size_of::<Vec3>()
            + self.texture_coordinates.len() * size_of::<Vec2>()
            + (self.tangents_x.len() + self.tangents_z.len()) * size_of::<PackedNormal>()
            + self.colors.len() * size_of::<Color>()
            + self.motion_vectors.len() * size_of::<Vec3>()
            + self.indices.len() * size_of::<u32>()
    }

    /// Check the encoder preconditions.
    ///
    /// Every flagged stream holds one element per vertex, indices stay in
    /// range, and each vertex is first referenced in increasing order
    /// (a new index is at most one past the largest seen so far).
    pub fn validate(&self) -> std::result::Result<(), String> {
        let n = self.positions.len();
        let info = &self.vertex_info;
        let streams = [
            ("tangent_x", info.has_tangent_x, self.tangents_x.len()),
            ("tangent_z", info.has_tangent_z, self.tangents_z.len()),
            ("uv0", info.has_uv0, self.texture_coordinates.len()),
            ("color0", info.has_color0, self.colors.len()),
            ("motion_vectors", info.has_motion_vectors, self.motion_vectors.len()),
        ];
        for (name, present, len) in streams {
            if present && len != n {
                return Err(format!("{name} has {len} elements for {n} vertices"));
            }
        }

        let mut next_unseen = 0u64;
        for (i, &index) in self.indices.iter().enumerate() {
            let index = u64::from(index);
            if index >= n as u64 {
                return Err(format!("index {index} at {i} out of range ({n} vertices)"));
            }
            if index > next_unseen {
                return Err(format!(
                    "index {index} at {i} skips unreferenced vertex {next_unseen}"
                ));
            }
            if index == next_unseen {
                next_unseen += 1;
            }
        }
        Ok(())
    }

    /// Renumber vertices in order of first reference by the index buffer,
    /// moving unreferenced vertices to the end.
    ///
    /// Frames produced this way satisfy the index-order part of
    /// [`MeshFrame::validate`].
    pub fn reorder_by_first_use(&mut self) {
        let n = self.positions.len();
        let mut remap = vec![u32::MAX; n];
        let mut order = Vec::with_capacity(n);
        for index in &mut self.indices {
            let old = *index as usize;
            if remap[old] == u32::MAX {
                remap[old] = order.len() as u32;
                order.push(old);
            }
            *index = remap[old];
        }
        order.extend((0..n).filter(|&v| remap[v] == u32::MAX));

        fn permute<T: Copy>(values: &mut Vec<T>, order: &[usize]) {
            if values.len() == order.len() {
                *values = order.iter().map(|&i| values[i]).collect();
            }
        }
        permute(&mut self.positions, &order);
        permute(&mut self.texture_coordinates, &order);
        permute(&mut self.tangents_x, &order);
        permute(&mut self.tangents_z, &order);
        permute(&mut self.colors, &order);
        permute(&mut self.motion_vectors, &order);
    }
}
