//! Byte sources backing a track's chunk payloads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;

use crate::util::{Error, Result};

/// Where a track's bytes live.
///
/// Resident sources (memory or memory-mapped) hand out slices directly, so
/// the cache copies chunks synchronously. File sources go through the
/// asynchronous reader.
pub struct TrackSource {
    inner: SourceInner,
    size: u64,
    path: Option<PathBuf>,
}

enum SourceInner {
    /// Bytes produced in-process (e.g. by an encode session)
    Memory(Arc<[u8]>),
    /// Memory-mapped file
    Mmap(Mmap),
    /// Buffered file access
    File(Arc<RwLock<File>>),
}

impl std::fmt::Debug for TrackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            SourceInner::Memory(_) => "memory",
            SourceInner::Mmap(_) => "mmap",
            SourceInner::File(_) => "file",
        };
        f.debug_struct("TrackSource")
            .field("kind", &kind)
            .field("size", &self.size)
            .field("path", &self.path)
            .finish()
    }
}

impl TrackSource {
    /// Open a track file memory-mapped (resident) or for streamed reads.
    pub fn open(path: impl AsRef<Path>, resident: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        let size = file.metadata()?.len();

        let inner = if resident && size > 0 {
            // Safety: the file is opened read-only and not modified while mapped
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            SourceInner::Mmap(mmap)
        } else {
            SourceInner::File(Arc::new(RwLock::new(file)))
        };

        Ok(Self {
            inner,
            size,
            path: Some(path.to_path_buf()),
        })
    }

    /// Resident source over in-memory bytes.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        Self {
            size: bytes.len() as u64,
            inner: SourceInner::Memory(bytes),
            path: None,
        }
    }

    /// Whether slices can be borrowed without I/O.
    pub fn is_resident(&self) -> bool {
        !matches!(self.inner, SourceInner::File(_))
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// File path, if the source is a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn check_range(&self, pos: u64, len: usize) -> Result<()> {
        match pos.checked_add(len as u64) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::UnexpectedEof(pos.saturating_add(len as u64))),
        }
    }

    /// Borrow bytes of a resident source.
    pub fn slice(&self, pos: u64, len: usize) -> Result<&[u8]> {
        self.check_range(pos, len)?;
        let range = pos as usize..pos as usize + len;
        match &self.inner {
            SourceInner::Memory(bytes) => Ok(&bytes[range]),
            SourceInner::Mmap(mmap) => Ok(&mmap[range]),
            SourceInner::File(_) => Err(Error::other("slice() requires a resident source")),
        }
    }

    /// Read bytes into an existing buffer.
    pub fn read_into(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(pos, buf.len())?;
        match &self.inner {
            SourceInner::File(file) => {
                let mut f = file.write();
                f.seek(SeekFrom::Start(pos))?;
                f.read_exact(buf)?;
                Ok(())
            }
            _ => {
                buf.copy_from_slice(self.slice(pos, buf.len())?);
                Ok(())
            }
        }
    }

    /// Read bytes at a specific position.
    pub fn read_bytes(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(pos, &mut buf)?;
        Ok(buf)
    }

    /// Sequential reader starting at `pos`.
    pub fn cursor(&self, pos: u64) -> SourceCursor<'_> {
        SourceCursor { source: self, pos }
    }
}

/// `Read` adapter walking a [`TrackSource`].
pub struct SourceCursor<'a> {
    source: &'a TrackSource,
    pos: u64,
}

impl SourceCursor<'_> {
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Advance without reading.
    pub fn skip(&mut self, len: u64) -> Result<()> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.source.size);
        self.pos = end.ok_or(Error::UnexpectedEof(self.source.size))?;
        Ok(())
    }
}

impl Read for SourceCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let available = self.source.size.saturating_sub(self.pos);
        let n = (buf.len() as u64).min(available) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.source
            .read_into(self.pos, &mut buf[..n])
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.pos += n as u64;
        Ok(n)
    }
}
