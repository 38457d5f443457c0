//! Frame codecs.
//!
//! [`Codec`] is the closed set of frame codecs a track can use:
//! - [`Codec::Raw`] - uncompressed reference storage
//! - [`Codec::EntropyV1`] - quantization, delta prediction and canonical
//!   Huffman coding
//!
//! Both decode into a caller-owned [`MeshFrame`] so buffers are reused
//! across frames.

pub mod bitstream;
pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod history;
pub mod huffman;
pub mod prediction;
pub mod quantizer;
pub mod raw;

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub use decoder::DecodeState;
pub use encoder::{EncodeStatistics, FrameEncoder};
pub use frame::{FrameHeader, TableId, FRAME_MAGIC};
pub use quantizer::{Quantizer, Vec2Quantizer, Vec3Quantizer};

use crate::config::EncoderConfig;
use crate::geom::{ConstantStreams, MeshFrame};
use crate::util::{Error, Result};

/// Frame codec variants, identified by a persisted id byte.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Codec {
    Raw,
    EntropyV1(EncoderConfig),
}

impl Default for Codec {
    fn default() -> Self {
        Self::EntropyV1(EncoderConfig::default())
    }
}

impl Codec {
    pub const RAW_ID: u8 = 0;
    pub const ENTROPY_V1_ID: u8 = 1;

    /// Id byte stored in track files.
    pub fn id(&self) -> u8 {
        match self {
            Self::Raw => Self::RAW_ID,
            Self::EntropyV1(_) => Self::ENTROPY_V1_ID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::EntropyV1(_) => "entropy-v1",
        }
    }

    /// Append one encoded frame to `out`.
    ///
    /// `keyframe` frames carry the track's constant streams; other frames
    /// omit them.
    pub fn encode_frame(&self, mesh: &MeshFrame, keyframe: bool, out: &mut Vec<u8>) -> Result<EncodeStatistics> {
        match self {
            Self::Raw => raw::encode_frame(mesh, out),
            Self::EntropyV1(config) => FrameEncoder::new(*config).encode(mesh, keyframe, out),
        }
    }

    /// Decode one frame into `out`.
    pub fn decode_frame(&self, state: &mut DecodeState, bytes: &[u8], out: &mut MeshFrame) -> Result<()> {
        match self {
            Self::Raw => {
                raw::decode_frame(bytes, out)?;
                state.mark_decoded();
                Ok(())
            }
            Self::EntropyV1(_) => decoder::decode_frame(state, bytes, out),
        }
    }

    /// Fresh decoder state; each decoding thread needs its own.
    pub fn create_decode_state(&self, constants: ConstantStreams) -> DecodeState {
        match self {
            // Raw frames always carry every stream.
            Self::Raw => DecodeState::new(ConstantStreams::default()),
            Self::EntropyV1(_) => DecodeState::new(constants),
        }
    }

    /// Write the id byte followed by the variant's configuration.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.id())?;
        if let Self::EntropyV1(config) = self {
            w.write_f32::<LittleEndian>(config.vertex_precision)?;
            w.write_u32::<LittleEndian>(config.uv_bits)?;
        }
        Ok(())
    }

    /// Inverse of [`Codec::write`].
    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        match r.read_u8()? {
            Self::RAW_ID => Ok(Self::Raw),
            Self::ENTROPY_V1_ID => {
                let config = EncoderConfig {
                    vertex_precision: r.read_f32::<LittleEndian>()?,
                    uv_bits: r.read_u32::<LittleEndian>()?,
                };
                Ok(Self::EntropyV1(config))
            }
            id => Err(Error::UnknownCodec(id)),
        }
    }
}
