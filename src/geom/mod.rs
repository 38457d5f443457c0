//! Mesh frame model.
//!
//! - [`MeshFrame`] - one decoded frame of vertex-cache geometry
//! - [`interpolate_frames`] - blend two frames of identical topology

pub mod interpolate;
pub mod mesh_data;

pub use interpolate::{interpolate_color, interpolate_frames, interpolate_packed_normal};
pub use mesh_data::{BatchInfo, Color, ConstantStreams, MeshFrame, PackedNormal, VertexInfo};
