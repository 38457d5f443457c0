//! Chunk streaming.
//!
//! - [`TrackSource`] - bytes of a track file, memory mapped or read on demand
//! - [`AsyncFileReader`] / [`ThreadedFileReader`] - asynchronous positional reads
//! - [`TrackStreamingCache`] - per-track residency with reference-counted mappings
//! - [`StreamingManager`] - service owning the reader and every track cache

pub mod cache;
pub mod io;
pub mod manager;
pub mod source;

pub use cache::{CacheStats, ChunkMapping, ChunkState, ConsumerId, TrackStreamingCache};
pub use io::{AsyncFileReader, FileHandle, Priority, ReadCallback, RequestHandle, ThreadedFileReader};
pub use manager::StreamingManager;
pub use source::TrackSource;
