use std::io;
use std::io::ErrorKind;

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::store::{FileHandle, FileStore};

/// An in-memory [FileStore]: a map of name to content. Handles support seeking.
#[derive(Default)]
pub struct MemStore {
    files: FxHashMap<String, Bytes>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    pub fn with_file(mut self, name: &str, content: impl Into<Bytes>) -> MemStore {
        self.files.insert(name.to_string(), content.into());
        self
    }
}

#[async_trait]
impl FileStore for MemStore {
    async fn open(&self, name: &str) -> io::Result<Box<dyn FileHandle>> {
        match self.files.get(name) {
            Some(data) => Ok(Box::new(MemFile { data: data.clone(), pos: 0 })),
            None => Err(io::Error::new(ErrorKind::NotFound, format!("no such file: {:?}", name))),
        }
    }
}

struct MemFile {
    data: Bytes,
    pos: u64,
}

#[async_trait]
impl FileHandle for MemFile {
    async fn size(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data.len().saturating_sub(self.pos as usize);
        let n = remaining.min(buf.len());
        let start = self.pos as usize;
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    async fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.pos = offset;
        Ok(())
    }
}

/// Wraps a [MemStore] in handles that do *not* implement `seek`, for exercising the
///  seek-unsupported error path.
pub struct SeeklessStore {
    inner: MemStore,
}

impl SeeklessStore {
    pub fn new(inner: MemStore) -> SeeklessStore {
        SeeklessStore { inner }
    }
}

#[async_trait]
impl FileStore for SeeklessStore {
    async fn open(&self, name: &str) -> io::Result<Box<dyn FileHandle>> {
        let inner = self.inner.open(name).await?;
        Ok(Box::new(SeeklessFile { inner }))
    }
}

struct SeeklessFile {
    inner: Box<dyn FileHandle>,
}

#[async_trait]
impl FileHandle for SeeklessFile {
    async fn size(&mut self) -> io::Result<u64> {
        self.inner.size().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).await
    }

    // seek deliberately not implemented: the trait default reports unsupported
}
