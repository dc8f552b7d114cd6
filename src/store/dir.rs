use std::io;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::store::{FileHandle, FileStore};

/// A [FileStore] rooted at a local directory. Names are interpreted relative to the root and
///  must not escape it: absolute paths and `..` components are rejected before any I/O.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> DirStore {
        DirStore { root: root.into() }
    }

    fn checked_path(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() {
            return Err(io::Error::new(ErrorKind::InvalidInput, "empty file name"));
        }
        let path = Path::new(name);
        let escapes = path.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_absolute() || escapes {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("file name escapes the served directory: {:?}", name),
            ));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl FileStore for DirStore {
    async fn open(&self, name: &str) -> io::Result<Box<dyn FileHandle>> {
        let path = self.checked_path(name)?;
        let file = File::open(path).await?;
        Ok(Box::new(DirFile { file }))
    }
}

struct DirFile {
    file: File,
}

#[async_trait]
impl FileHandle for DirFile {
    async fn size(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf).await
    }

    async fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        Ok(())
    }
}
