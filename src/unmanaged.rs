//! Unmanaged data sources
//!
//! An unmanaged disk is a pure capability: a stable identity, a byte
//! length, and a re-openable byte stream. It carries no persistence
//! semantics of its own; wrapping one in a container and putting it to a
//! store is what makes it managed.

use crate::descriptor::DiskId;
use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A source of raw disk bytes awaiting acquisition
pub trait UnmanagedDisk: Send + Sync {
    /// Stable identity of the source
    fn id(&self) -> &DiskId;

    /// Total length in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a fresh stream over the source bytes.
    ///
    /// Each call returns an independent cursor positioned at the start, so
    /// a source can be digested and then streamed again for the write pass.
    fn open(&self) -> Result<Box<dyn Read + Send>>;
}

/// A file or block device on the local filesystem
pub struct FileDisk {
    id: DiskId,
    path: PathBuf,
    len: u64,
}

impl FileDisk {
    /// Wrap a regular file, taking its length from filesystem metadata
    pub fn new(id: DiskId, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = std::fs::metadata(&path)?.len();
        Ok(FileDisk { id, path, len })
    }

    /// Wrap a path with an explicit length.
    ///
    /// Block devices report zero-length metadata; the caller supplies the
    /// device size instead.
    pub fn with_len(id: DiskId, path: impl AsRef<Path>, len: u64) -> Self {
        FileDisk {
            id,
            path: path.as_ref().to_path_buf(),
            len,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UnmanagedDisk for FileDisk {
    fn id(&self) -> &DiskId {
        &self.id
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(file.take(self.len)))
    }
}

/// An in-memory byte buffer, shared across reopens
pub struct BufferDisk {
    id: DiskId,
    data: Arc<Vec<u8>>,
}

impl BufferDisk {
    pub fn new(id: DiskId, data: Vec<u8>) -> Self {
        BufferDisk {
            id,
            data: Arc::new(data),
        }
    }
}

impl UnmanagedDisk for BufferDisk {
    fn id(&self) -> &DiskId {
        &self.id
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(ArcCursor {
            data: Arc::clone(&self.data),
            pos: 0,
        }))
    }
}

struct ArcCursor {
    data: Arc<Vec<u8>>,
    pos: usize,
}

impl Read for ArcCursor {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}
