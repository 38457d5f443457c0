//! Streaming service owning the caches of all registered tracks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::cache::TrackStreamingCache;
use super::io::{AsyncFileReader, ThreadedFileReader};
use crate::config::StreamingConfig;
use crate::track::StreamableTrack;
use crate::util::{Error, Result};

/// Explicitly constructed streaming service.
///
/// Owns the file reader and one [`TrackStreamingCache`] per registered
/// track. The owner ticks it once per frame with [`StreamingManager::update`]
/// and tears it down with [`StreamingManager::shutdown`].
pub struct StreamingManager {
    config: StreamingConfig,
    reader: Arc<ThreadedFileReader>,
    caches: RwLock<Vec<Arc<TrackStreamingCache>>>,
}

impl std::fmt::Debug for StreamingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingManager")
            .field("config", &self.config)
            .field("tracks", &self.caches.read().len())
            .finish()
    }
}

impl StreamingManager {
    pub fn new(config: StreamingConfig) -> Result<Self> {
        let reader = Arc::new(ThreadedFileReader::new(config.reader_threads)?);
        Ok(Self {
            config,
            reader,
            caches: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Create the cache for `track`.
    pub fn register_track(&self, track: Arc<StreamableTrack>) -> Result<Arc<TrackStreamingCache>> {
        let reader: Arc<dyn AsyncFileReader> = self.reader.clone();
        let cache = Arc::new(TrackStreamingCache::new(track, Some(reader))?);
        debug!("Registered track '{}'", cache.track().name());
        self.caches.write().push(cache.clone());
        Ok(cache)
    }

    /// Forget a track's cache. Outstanding reads still complete.
    pub fn unregister_track(&self, cache: &Arc<TrackStreamingCache>) {
        self.caches.write().retain(|c| !Arc::ptr_eq(c, cache));
    }

    pub fn track_count(&self) -> usize {
        self.caches.read().len()
    }

    pub fn caches(&self) -> Vec<Arc<TrackStreamingCache>> {
        self.caches.read().clone()
    }

    /// Tick every cache.
    pub fn update(&self) {
        for cache in self.caches.read().iter() {
            cache.update_streaming_status();
        }
    }

    /// Wait for outstanding reads, then stop the reader threads.
    ///
    /// Returns [`Error::Timeout`] if reads are still pending after `timeout`;
    /// the reader is stopped either way.
    pub fn shutdown(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let caches = self.caches();
        let mut finished = true;
        for cache in &caches {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !cache.block_till_all_requests_finished(remaining) {
                warn!("Track '{}' still has pending reads at shutdown", cache.track().name());
                finished = false;
            }
        }
        self.reader.shutdown();
        self.caches.write().clear();
        info!("Streaming stopped ({} tracks)", caches.len());
        if finished {
            Ok(())
        } else {
            Err(Error::Timeout(timeout))
        }
    }
}

impl Drop for StreamingManager {
    fn drop(&mut self) {
        if !self.caches.read().is_empty() {
            let _ = self.shutdown(self.config.shutdown_timeout());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::geom::MeshFrame;
    use crate::streaming::cache::ChunkState;
    use crate::track::EncodeSession;
    use crate::util::Vec3;

    fn write_track(dir: &tempfile::TempDir, frames: usize) -> std::path::PathBuf {
        let path = dir.path().join("manager.gcache");
        let mut session = EncodeSession::new(Codec::default());
        for f in 0..frames {
            let mut mesh = MeshFrame::new();
            mesh.positions = vec![Vec3::ZERO, Vec3::Y, Vec3::new(1.0, f as f32, 0.0)];
            mesh.indices = vec![0, 1, 2];
            session.add_frame(&mesh, f as f32 * 0.5, true).expect("encode");
        }
        session.write_to_file(&path).expect("write");
        path
    }

    #[test]
    fn test_streamed_track_through_manager() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_track(&dir, 6);
        let manager = StreamingManager::new(StreamingConfig::default()).expect("manager");
        let track = Arc::new(StreamableTrack::open(&path, false).expect("open"));
        let cache = manager.register_track(track).expect("register");

        let consumer = cache.register_consumer();
        cache
            .prefetch(consumer, 0.0, 1.0, false, Duration::from_secs(5))
            .expect("prefetch");
        for chunk in 0..=2 {
            assert_eq!(cache.chunk_state(chunk), Some(ChunkState::Available));
        }

        cache.set_window(consumer, 2.0, 2.5, false);
        manager.update();
        assert!(cache.block_till_all_requests_finished(Duration::from_secs(5)));
        manager.update();
        assert!(cache.map_chunk(5).is_some());
        assert_eq!(cache.chunk_state(0), None);

        manager.shutdown(Duration::from_secs(5)).expect("shutdown");
        assert_eq!(manager.track_count(), 0);
    }

    #[test]
    fn test_unregister_track() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_track(&dir, 2);
        let manager = StreamingManager::new(StreamingConfig::default()).expect("manager");
        let cache = manager
            .register_track(Arc::new(StreamableTrack::open(&path, true).expect("open")))
            .expect("register");
        assert_eq!(manager.track_count(), 1);
        manager.unregister_track(&cache);
        assert_eq!(manager.track_count(), 0);
    }
}
