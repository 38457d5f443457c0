//! # geomcache
//!
//! Streaming geometry cache for animated vertex-cache meshes.
//!
//! Frames are compressed one by one with a quantizing, delta-predicting,
//! canonical-Huffman codec, stored as chunks of a track file and streamed
//! back through a reference-counted residency cache for playback.
//!
//! ## Modules
//!
//! - [`util`] - Error type, bounding boxes, math re-exports
//! - [`config`] - Encoder, streaming and playback settings
//! - [`codec`] - Bit streams, Huffman coding, quantization, frame codecs
//! - [`geom`] - Mesh frame model and frame interpolation
//! - [`track`] - Chunk store, sample index, topology, visibility, track files
//! - [`streaming`] - Track sources, async reader, streaming cache and service
//! - [`playback`] - Time-driven frame decoding with fallbacks
//!
//! ## Example
//!
//! ```ignore
//! use geomcache::prelude::*;
//!
//! let mut session = EncodeSession::new(Codec::default());
//! for (i, mesh) in frames.iter().enumerate() {
//!     session.add_frame(mesh, i as f32 / 30.0, true)?;
//! }
//! session.write_to_file("anim.gcache")?;
//!
//! let manager = StreamingManager::new(StreamingConfig::default())?;
//! let track = Arc::new(StreamableTrack::open("anim.gcache", false)?);
//! let mut player = TrackPlayer::new(manager.register_track(track)?, PlaybackConfig::default());
//! player.tick(0.5);
//! manager.update();
//! ```

pub mod util;
pub mod config;
pub mod codec;
pub mod geom;
pub mod track;
pub mod streaming;
pub mod playback;

// Re-export commonly used types
pub use util::{Error, Result};
pub use codec::Codec;
pub use track::{EncodeSession, StreamableTrack};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{BBox3f, Chrono, Error, Result, Vec2, Vec3};
    pub use crate::config::{EncoderConfig, PlaybackConfig, Settings, StreamingConfig};
    pub use crate::codec::{Codec, DecodeState, EncodeStatistics};
    pub use crate::geom::*;
    pub use crate::track::{EncodeSession, FrameInput, StreamableTrack};
    pub use crate::streaming::{StreamingManager, TrackStreamingCache};
    pub use crate::playback::{FrameStatus, TrackPlayer};
}
