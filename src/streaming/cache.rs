//! Per-track chunk residency.
//!
//! Each chunk moves through `Requested -> Available -> Evicted -> freed`.
//! Consumers publish the time window they need; [`TrackStreamingCache::update_streaming_status`]
//! turns the union of those windows into read requests and evictions.
//!
//! Reader threads never touch the cache state. Their completion callbacks
//! post a [`Completion`] record to a channel that the cache drains under
//! its own lock, at the start of every update and before every map.
//!
//! Memory of an evicted chunk is released only once no [`ChunkMapping`] of
//! it is alive.

use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::io::{AsyncFileReader, FileHandle, Priority, RequestHandle};
use crate::track::StreamableTrack;
use crate::util::{Chrono, Error, Result};

/// Residency state of one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkState {
    /// Read issued, bytes not delivered yet
    Requested,
    /// Resident and mappable
    Available,
    /// No longer needed; memory kept while mappings exist
    Evicted,
    /// Read failed; not retried while the chunk stays needed
    Failed,
}

/// Consumer registered with a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Window {
    start: Chrono,
    end: Chrono,
    looping: bool,
}

#[derive(Debug)]
struct ResidentChunk {
    state: ChunkState,
    memory: Option<Arc<[u8]>>,
    refcount: u32,
    request: Option<RequestHandle>,
}

impl ResidentChunk {
    fn requested(request: RequestHandle) -> Self {
        Self {
            state: ChunkState::Requested,
            memory: None,
            refcount: 0,
            request: Some(request),
        }
    }

    fn available(memory: Arc<[u8]>) -> Self {
        Self {
            state: ChunkState::Available,
            memory: Some(memory),
            refcount: 0,
            request: None,
        }
    }

    fn failed() -> Self {
        Self {
            state: ChunkState::Failed,
            memory: None,
            refcount: 0,
            request: None,
        }
    }
}

/// Result of an asynchronous chunk read, posted by a reader thread.
pub struct Completion {
    pub chunk: u32,
    pub result: Result<Vec<u8>>,
}

#[derive(Debug, Default)]
struct CacheState {
    chunks: HashMap<u32, ResidentChunk>,
    consumers: HashMap<ConsumerId, Option<Window>>,
    next_consumer: u64,
}

/// Residency counters, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub requested: usize,
    pub available: usize,
    pub evicted: usize,
    pub failed: usize,
    pub resident_bytes: usize,
}

/// Streaming cache of one track.
pub struct TrackStreamingCache {
    track: Arc<StreamableTrack>,
    reader: Option<(Arc<dyn AsyncFileReader>, FileHandle)>,
    state: Mutex<CacheState>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
}

impl std::fmt::Debug for TrackStreamingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackStreamingCache")
            .field("track", &self.track.name())
            .field("streamed", &self.reader.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

impl TrackStreamingCache {
    /// Cache for `track`.
    ///
    /// Resident tracks are served by synchronous copies; file-backed tracks
    /// need `reader`.
    pub fn new(track: Arc<StreamableTrack>, reader: Option<Arc<dyn AsyncFileReader>>) -> Result<Self> {
        let reader = if track.source().is_resident() {
            None
        } else {
            let reader = reader.ok_or_else(|| Error::other("file-backed track needs a file reader"))?;
            let path = track
                .source()
                .path()
                .ok_or_else(|| Error::other("file-backed track has no path"))?;
            let file = reader.open_read(path)?;
            Some((reader, file))
        };
        let (completion_tx, completion_rx) = unbounded();
        Ok(Self {
            track,
            reader,
            state: Mutex::new(CacheState::default()),
            completion_tx,
            completion_rx,
        })
    }

    pub fn track(&self) -> &Arc<StreamableTrack> {
        &self.track
    }

    /// Register a consumer. It needs nothing until it sets a window.
    pub fn register_consumer(&self) -> ConsumerId {
        let mut state = self.state.lock();
        let id = ConsumerId(state.next_consumer);
        state.next_consumer += 1;
        state.consumers.insert(id, None);
        id
    }

    /// Publish the time range `consumer` needs.
    pub fn set_window(&self, consumer: ConsumerId, start: Chrono, end: Chrono, looping: bool) {
        if let Some(window) = self.state.lock().consumers.get_mut(&consumer) {
            *window = Some(Window { start, end, looping });
        }
    }

    /// Drop a consumer; its chunks are evicted on the next update.
    pub fn unregister_consumer(&self, consumer: ConsumerId) {
        self.state.lock().consumers.remove(&consumer);
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    /// Union of the chunks every consumer needs.
    fn needed_chunks(&self, state: &CacheState) -> BTreeSet<u32> {
        let mut needed = BTreeSet::new();
        for window in state.consumers.values().flatten() {
            needed.extend(self.track.chunks_for_time_range(window.start, window.end, window.looping));
        }
        // Later frames depend on the keyframe's constant streams.
        if !state.consumers.is_empty() && self.track.constants().any() && !self.track.chunks().is_empty() {
            needed.insert(0);
        }
        needed
    }

    /// Apply queued read completions. Caller holds the state lock.
    fn drain_completions(&self, state: &mut CacheState) {
        while let Ok(Completion { chunk, result }) = self.completion_rx.try_recv() {
            let Some(entry) = state.chunks.get_mut(&chunk) else {
                continue;
            };
            if entry.state != ChunkState::Requested {
                continue;
            }
            entry.request = None;
            match result {
                Ok(bytes) => {
                    trace!(chunk, bytes = bytes.len(), "chunk available");
                    entry.memory = Some(Arc::from(bytes));
                    entry.state = ChunkState::Available;
                }
                Err(e) => {
                    warn!("Failed to read chunk {} of track '{}': {}", chunk, self.track.name(), e);
                    entry.state = ChunkState::Failed;
                }
            }
        }
    }

    /// Start loading `chunk`: a copy for resident tracks, a read otherwise.
    fn request_chunk(&self, chunk: u32, priority: Priority) -> ResidentChunk {
        let info = match self.track.chunks().get(chunk) {
            Ok(info) => *info,
            Err(e) => {
                warn!("Cannot request chunk {}: {}", chunk, e);
                return ResidentChunk::failed();
            }
        };

        match &self.reader {
            None => match self.track.source().slice(info.offset, info.data_size as usize) {
                Ok(bytes) => {
                    trace!(chunk, "chunk copied");
                    ResidentChunk::available(Arc::from(bytes))
                }
                Err(e) => {
                    warn!("Failed to copy chunk {} of track '{}': {}", chunk, self.track.name(), e);
                    ResidentChunk::failed()
                }
            },
            Some((reader, file)) => {
                let tx = self.completion_tx.clone();
                let on_complete = Box::new(move |result| {
                    let _ = tx.send(Completion { chunk, result });
                });
                match reader.read_request(*file, info.offset, info.data_size as usize, priority, on_complete) {
                    Ok(request) => {
                        trace!(chunk, "chunk requested");
                        ResidentChunk::requested(request)
                    }
                    Err(e) => {
                        warn!("Failed to request chunk {} of track '{}': {}", chunk, self.track.name(), e);
                        ResidentChunk::failed()
                    }
                }
            }
        }
    }

    fn update_locked(&self, state: &mut CacheState, priority: Priority) {
        self.drain_completions(state);
        let needed = self.needed_chunks(state);

        for &chunk in &needed {
            match state.chunks.get_mut(&chunk) {
                None => {
                    let entry = self.request_chunk(chunk, priority);
                    state.chunks.insert(chunk, entry);
                }
                Some(entry) if entry.state == ChunkState::Evicted => {
                    trace!(chunk, "chunk revived");
                    entry.state = ChunkState::Available;
                }
                Some(_) => {}
            }
        }

        let mut freed = 0usize;
        state.chunks.retain(|chunk, entry| {
            if needed.contains(chunk) {
                return true;
            }
            match entry.state {
                ChunkState::Available => {
                    trace!(chunk, "chunk evicted");
                    entry.state = ChunkState::Evicted;
                }
                // Reads are never cancelled; a late completion is evicted next time.
                ChunkState::Requested => return true,
                ChunkState::Evicted | ChunkState::Failed => {}
            }
            let keep = entry.refcount > 0;
            if !keep {
                freed += 1;
            }
            keep
        });
        if freed > 0 {
            trace!(freed, "chunks freed");
        }
    }

    /// Reconcile residency with the consumers' windows. Call once per tick
    /// from the owning thread.
    pub fn update_streaming_status(&self) {
        let mut state = self.state.lock();
        self.update_locked(&mut state, Priority::Normal);
    }

    /// Map a chunk for reading. `None` when it is not available yet.
    pub fn map_chunk(&self, chunk: u32) -> Option<ChunkMapping<'_>> {
        let mut state = self.state.lock();
        self.drain_completions(&mut state);
        let entry = state.chunks.get_mut(&chunk)?;
        if entry.state != ChunkState::Available {
            return None;
        }
        let data = entry.memory.clone()?;
        entry.refcount += 1;
        Some(ChunkMapping {
            cache: self,
            chunk,
            data,
        })
    }

    fn unmap_chunk(&self, chunk: u32) {
        let mut state = self.state.lock();
        let Some(entry) = state.chunks.get_mut(&chunk) else {
            debug_assert!(false, "unmap of unknown chunk {chunk}");
            return;
        };
        debug_assert!(entry.refcount > 0, "unbalanced unmap of chunk {chunk}");
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount == 0 && entry.state == ChunkState::Evicted {
            trace!(chunk, "evicted chunk released");
            state.chunks.remove(&chunk);
        }
    }

    /// Synchronously load the chunks `consumer` needs for `[start, end]`.
    ///
    /// Sets the consumer's window, issues high priority reads and waits for
    /// them. Fails on timeout or when a chunk cannot be read.
    pub fn prefetch(&self, consumer: ConsumerId, start: Chrono, end: Chrono, looping: bool, timeout: Duration) -> Result<()> {
        self.set_window(consumer, start, end, looping);
        let wanted = self.track.chunks_for_time_range(start, end, looping);
        {
            let mut state = self.state.lock();
            self.update_locked(&mut state, Priority::High);
        }
        if !self.block_till_all_requests_finished(timeout) {
            return Err(Error::Timeout(timeout));
        }

        let mut state = self.state.lock();
        self.drain_completions(&mut state);
        let failed = wanted
            .iter()
            .filter(|&&id| !matches!(state.chunks.get(&id), Some(c) if c.state == ChunkState::Available))
            .count();
        debug!(
            track = self.track.name(),
            chunks = wanted.len(),
            failed,
            "prefetch finished"
        );
        if failed > 0 {
            return Err(Error::other(format!(
                "{failed} of {} chunks of track '{}' failed to load",
                wanted.len(),
                self.track.name()
            )));
        }
        Ok(())
    }

    /// Wait for every outstanding read. Returns false on timeout.
    pub fn block_till_all_requests_finished(&self, timeout: Duration) -> bool {
        let requests: Vec<RequestHandle> = self
            .state
            .lock()
            .chunks
            .values()
            .filter_map(|c| c.request.clone())
            .collect();
        let deadline = Instant::now() + timeout;
        requests.iter().all(|request| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match &self.reader {
                Some((reader, _)) => reader.wait_completion(request, remaining),
                None => request.wait(remaining),
            }
        })
    }

    pub fn chunk_state(&self, chunk: u32) -> Option<ChunkState> {
        self.state.lock().chunks.get(&chunk).map(|c| c.state)
    }

    /// Live mappings of a chunk.
    pub fn refcount(&self, chunk: u32) -> u32 {
        self.state.lock().chunks.get(&chunk).map_or(0, |c| c.refcount)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = CacheStats::default();
        for c in state.chunks.values() {
            match c.state {
                ChunkState::Requested => stats.requested += 1,
                ChunkState::Available => stats.available += 1,
                ChunkState::Evicted => stats.evicted += 1,
                ChunkState::Failed => stats.failed += 1,
            }
            stats.resident_bytes += c.memory.as_ref().map_or(0, |m| m.len());
        }
        stats
    }
}

/// Read access to a resident chunk. Unmaps on drop.
pub struct ChunkMapping<'a> {
    cache: &'a TrackStreamingCache,
    chunk: u32,
    data: Arc<[u8]>,
}

impl ChunkMapping<'_> {
    pub fn chunk(&self) -> u32 {
        self.chunk
    }
}

impl Deref for ChunkMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for ChunkMapping<'_> {
    fn drop(&mut self) {
        self.cache.unmap_chunk(self.chunk);
    }
}
