//! File-like handles over fetched objects.
//!
//! A [`BackendFile`] comes in two shapes. Objects small enough to buffer are
//! served from the shared cache: they support arbitrary absolute seeks and
//! cheap re-reads. Objects past the backend's size limit wrap the live body
//! instead: forward-only, never cached.

use bytes::Bytes;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cache::CachedObject;
use crate::error::{DienerError, Result};

/// Mode reported for every served object: owner read/write, nothing else.
pub const FILE_MODE: u32 = 0o600;

/// Metadata projection for one open file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub size: i64,
    pub mode: u32,
    pub modified: SystemTime,
    pub is_dir: bool,
}

/// A file-like handle over either cached bytes or a live streaming body.
/// Handles are owned by a single request and are not safe for concurrent
/// readers.
pub enum BackendFile {
    Cached(CachedFile),
    Direct(DirectFile),
}

impl std::fmt::Debug for BackendFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendFile::Cached(file) => f.debug_tuple("Cached").field(file).finish(),
            BackendFile::Direct(file) => f.debug_tuple("Direct").field(file).finish(),
        }
    }
}

impl BackendFile {
    pub fn cached(name: impl Into<String>, entry: Arc<CachedObject>) -> Self {
        BackendFile::Cached(CachedFile {
            name: name.into(),
            entry,
            offset: 0,
        })
    }

    pub fn direct(
        name: impl Into<String>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        declared_len: i64,
        fetched_at: SystemTime,
    ) -> Self {
        BackendFile::Direct(DirectFile {
            name: name.into(),
            reader: Some(reader),
            declared_len,
            fetched_at,
        })
    }

    /// Read up to `buf.len()` bytes, returning the count. A cached file
    /// returns 0 once exhausted; a direct file surfaces stream errors.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            BackendFile::Cached(file) => Ok(file.read(buf)),
            BackendFile::Direct(file) => file.read(buf).await,
        }
    }

    /// Absolute seeks only, and only on cached files.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            BackendFile::Cached(file) => file.seek(pos),
            BackendFile::Direct(_) => Err(DienerError::Invalid(
                "seek on streaming file".to_string(),
            )),
        }
    }

    /// Objects are never directories; listing yields nothing.
    pub fn readdir(&mut self, _count: usize) -> Result<Vec<FileInfo>> {
        Ok(Vec::new())
    }

    pub fn stat(&self) -> FileInfo {
        match self {
            BackendFile::Cached(file) => FileInfo {
                name: file.name.clone(),
                size: file.entry.declared_len,
                mode: FILE_MODE,
                modified: file.entry.fetched_at,
                is_dir: false,
            },
            BackendFile::Direct(file) => FileInfo {
                name: file.name.clone(),
                size: file.declared_len,
                mode: FILE_MODE,
                modified: file.fetched_at,
                is_dir: false,
            },
        }
    }

    /// Release the underlying body. A no-op for cached files.
    pub async fn close(&mut self) -> Result<()> {
        if let BackendFile::Direct(file) = self {
            file.reader = None;
        }
        Ok(())
    }
}

/// Seekable view over a shared cache entry.
pub struct CachedFile {
    name: String,
    entry: Arc<CachedObject>,
    offset: u64,
}

impl std::fmt::Debug for CachedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFile")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .finish()
    }
}

impl CachedFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let len = self.entry.data.len() as u64;
        let start = self.offset.min(len);
        let n = ((len - start) as usize).min(buf.len());
        buf[..n].copy_from_slice(&self.entry.data[start as usize..start as usize + n]);
        self.offset = start + n as u64;
        n
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match pos {
            SeekFrom::Start(offset) => {
                self.offset = offset;
                Ok(self.offset)
            }
            _ => Err(DienerError::Invalid("relative seek".to_string())),
        }
    }

    /// The bytes left from the current offset, aliasing the cache entry.
    pub fn remaining(&self) -> Bytes {
        let start = (self.offset as usize).min(self.entry.data.len());
        self.entry.data.slice(start..)
    }
}

/// Forward-only wrapper over a live body.
pub struct DirectFile {
    name: String,
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
    declared_len: i64,
    fetched_at: SystemTime,
}

impl std::fmt::Debug for DirectFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectFile")
            .field("name", &self.name)
            .field("has_reader", &self.reader.is_some())
            .field("declared_len", &self.declared_len)
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

impl DirectFile {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader.read(buf).await?),
            None => Err(DienerError::Invalid("read on closed file".to_string())),
        }
    }
}
