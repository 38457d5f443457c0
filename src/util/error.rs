//! Error types for the geometry cache library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for geometry cache operations.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Frame header carried the wrong magic value
    #[error("Incompatible bitstream: expected magic {expected:#010x}, found {found:#010x}")]
    InvalidMagic { expected: u32, found: u32 },

    /// Buffer or file is truncated
    #[error("Unexpected end of data at position {0}")]
    UnexpectedEof(u64),

    /// Coded payload does not decode to a valid frame
    #[error("Corrupt bitstream: {0}")]
    CorruptBitstream(String),

    /// Serialized code lengths do not describe a prefix code
    #[error("Invalid Huffman table: {0}")]
    InvalidHuffmanTable(String),

    /// Invalid data structure in a track file
    #[error("Invalid track structure: {0}")]
    InvalidStructure(String),

    /// Codec id read from a track file is not known
    #[error("Unknown codec id: {0}")]
    UnknownCodec(u8),

    /// Frame omits a constant stream and the decode state has not seen the keyframe
    #[error("Frame omits the constant {stream} stream and no keyframe has been decoded")]
    MissingKeyframe { stream: &'static str },

    /// Chunk index out of bounds
    #[error("Chunk index {index} out of bounds (count: {count})")]
    ChunkOutOfBounds { index: u32, count: u32 },

    /// Sample index out of bounds
    #[error("Sample index {index} out of bounds (count: {count})")]
    SampleOutOfBounds { index: u32, count: u32 },

    /// Blocking wait gave up
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Memory mapping failed
    #[error("Memory mapping failed: {0}")]
    MmapFailed(String),

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// Create a corrupt bitstream error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptBitstream(msg.into())
    }

    /// Map an `UnexpectedEof` I/O error onto [`Error::UnexpectedEof`].
    pub(crate) fn from_read(e: std::io::Error, pos: u64) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof(pos)
        } else {
            Self::Io(e)
        }
    }
}

/// Result type alias for geometry cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::InvalidMagic { expected: 0x3156_4347, found: 0 };
        assert!(e.to_string().contains("magic"));

        let e = Error::ChunkOutOfBounds { index: 5, count: 3 };
        assert!(e.to_string().contains('5'));
        assert!(e.to_string().contains('3'));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_eof_mapping() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        assert!(matches!(Error::from_read(io_err, 12), Error::UnexpectedEof(12)));
    }
}
