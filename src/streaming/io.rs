//! Asynchronous positional file reads.
//!
//! [`AsyncFileReader`] is the read primitive the streaming cache depends on.
//! [`ThreadedFileReader`] implements it with a small pool of worker threads
//! pulling from two priority lanes.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use super::source::TrackSource;
use crate::util::{Error, Result};

/// Request lane. High priority requests are served first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Priority {
    High,
    #[default]
    Normal,
}

/// Called exactly once with the bytes read or the failure.
pub type ReadCallback = Box<dyn FnOnce(Result<Vec<u8>>) + Send + 'static>;

/// File opened with [`AsyncFileReader::open_read`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileHandle(pub(crate) u32);

#[derive(Debug, Default)]
struct RequestState {
    done: Mutex<bool>,
    cond: Condvar,
}

/// Completion flag of one read request.
#[derive(Clone, Debug, Default)]
pub struct RequestHandle {
    state: Arc<RequestState>,
}

impl RequestHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        *self.state.done.lock()
    }

    /// Mark complete and wake waiters.
    pub fn complete(&self) {
        *self.state.done.lock() = true;
        self.state.cond.notify_all();
    }

    /// Wait until complete. Returns false on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.state.done.lock();
        while !*done {
            if self.state.cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

/// Asynchronous read primitive.
pub trait AsyncFileReader: Send + Sync {
    /// Open `path` for reading.
    fn open_read(&self, path: &Path) -> Result<FileHandle>;

    /// Queue a read of `size` bytes at `offset`.
    ///
    /// `on_complete` runs on a reader thread before the returned handle
    /// completes.
    fn read_request(
        &self,
        file: FileHandle,
        offset: u64,
        size: usize,
        priority: Priority,
        on_complete: ReadCallback,
    ) -> Result<RequestHandle>;

    /// Wait for a request. Returns false on timeout.
    fn wait_completion(&self, request: &RequestHandle, timeout: Duration) -> bool {
        request.wait(timeout)
    }
}

struct ReadJob {
    source: Arc<TrackSource>,
    offset: u64,
    size: usize,
    on_complete: ReadCallback,
    request: RequestHandle,
}

impl ReadJob {
    fn run(self) {
        trace!(offset = self.offset, size = self.size, "read");
        let result = self.source.read_bytes(self.offset, self.size);
        (self.on_complete)(result);
        self.request.complete();
    }
}

/// Worker-thread implementation of [`AsyncFileReader`].
pub struct ThreadedFileReader {
    files: RwLock<Vec<Arc<TrackSource>>>,
    lanes: Mutex<Option<(Sender<ReadJob>, Sender<ReadJob>)>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ThreadedFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedFileReader")
            .field("files", &self.files.read().len())
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}

impl ThreadedFileReader {
    /// Start `threads` worker threads (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let (high_tx, high_rx) = unbounded::<ReadJob>();
        let (normal_tx, normal_rx) = unbounded::<ReadJob>();

        let mut workers = Vec::new();
        for i in 0..threads.max(1) {
            let high = high_rx.clone();
            let normal = normal_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("geomcache-reader-{i}"))
                .spawn(move || worker_loop(high, normal))?;
            workers.push(handle);
        }
        debug!("Started {} reader threads", workers.len());

        Ok(Self {
            files: RwLock::new(Vec::new()),
            lanes: Mutex::new(Some((high_tx, normal_tx))),
            workers: Mutex::new(workers),
        })
    }

    /// Stop accepting requests, finish queued ones and join the workers.
    pub fn shutdown(&self) {
        let lanes = self.lanes.lock().take();
        if lanes.is_none() {
            return;
        }
        // Workers exit once the disconnected lanes drain.
        drop(lanes);
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        debug!("Reader threads stopped");
    }
}

fn worker_loop(high: Receiver<ReadJob>, normal: Receiver<ReadJob>) {
    loop {
        if let Ok(job) = high.try_recv() {
            job.run();
            continue;
        }
        let job = select! {
            recv(high) -> job => job.or_else(|_| normal.recv()),
            recv(normal) -> job => job.or_else(|_| high.recv()),
        };
        match job {
            Ok(job) => job.run(),
            Err(_) => break,
        }
    }
}

impl AsyncFileReader for ThreadedFileReader {
    fn open_read(&self, path: &Path) -> Result<FileHandle> {
        let source = Arc::new(TrackSource::open(path, false)?);
        let mut files = self.files.write();
        files.push(source);
        Ok(FileHandle((files.len() - 1) as u32))
    }

    fn read_request(
        &self,
        file: FileHandle,
        offset: u64,
        size: usize,
        priority: Priority,
        on_complete: ReadCallback,
    ) -> Result<RequestHandle> {
        let source = self
            .files
            .read()
            .get(file.0 as usize)
            .cloned()
            .ok_or_else(|| Error::other(format!("unknown file handle {}", file.0)))?;
        let request = RequestHandle::new();
        let job = ReadJob {
            source,
            offset,
            size,
            on_complete,
            request: request.clone(),
        };

        let lanes = self.lanes.lock();
        let (high, normal) = lanes.as_ref().ok_or_else(|| Error::other("file reader is shut down"))?;
        let lane = match priority {
            Priority::High => high,
            Priority::Normal => normal,
        };
        lane.send(job).map_err(|_| Error::other("file reader is shut down"))?;
        Ok(request)
    }
}

impl Drop for ThreadedFileReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(len: usize) -> NamedTempFile {
        let mut f = NamedTempFile::new().expect("temp file");
        let bytes: Vec<u8> = (0..len).map(|i| i as u8).collect();
        f.write_all(&bytes).expect("write");
        f.flush().expect("flush");
        f
    }

    #[test]
    fn test_read_request_completes() {
        let f = temp_file(256);
        let reader = ThreadedFileReader::new(2).expect("reader");
        let file = reader.open_read(f.path()).expect("open");

        let (tx, rx) = crossbeam_channel::unbounded();
        let request = reader
            .read_request(
                file,
                10,
                4,
                Priority::Normal,
                Box::new(move |r| {
                    let _ = tx.send(r);
                }),
            )
            .expect("request");
        assert!(reader.wait_completion(&request, Duration::from_secs(5)));
        assert!(request.is_complete());
        let bytes = rx.try_recv().expect("callback ran").expect("read ok");
        assert_eq!(bytes, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_failed_read_reports_error() {
        let f = temp_file(8);
        let reader = ThreadedFileReader::new(1).expect("reader");
        let file = reader.open_read(f.path()).expect("open");
        let (tx, rx) = crossbeam_channel::unbounded();
        let request = reader
            .read_request(
                file,
                4,
                100,
                Priority::High,
                Box::new(move |r| {
                    let _ = tx.send(r.is_err());
                }),
            )
            .expect("request");
        assert!(request.wait(Duration::from_secs(5)));
        assert!(rx.try_recv().expect("callback ran"));
    }

    #[test]
    fn test_unknown_handle_and_shutdown() {
        let reader = ThreadedFileReader::new(1).expect("reader");
        assert!(reader
            .read_request(FileHandle(3), 0, 1, Priority::Normal, Box::new(|_| {}))
            .is_err());

        let f = temp_file(8);
        let file = reader.open_read(f.path()).expect("open");
        reader.shutdown();
        assert!(reader
            .read_request(file, 0, 1, Priority::Normal, Box::new(|_| {}))
            .is_err());
    }

    #[test]
    fn test_wait_timeout() {
        let request = RequestHandle::new();
        assert!(!request.wait(Duration::from_millis(10)));
        request.complete();
        assert!(request.wait(Duration::from_millis(10)));
    }
}
