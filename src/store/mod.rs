//! The abstract read-only file collaborator the server serves from. The server never touches
//!  the filesystem directly: it goes through [FileStore] so that embedders can serve from a
//!  directory ([dir::DirStore]), from memory (test_util), or from anything else name-addressed.

pub mod dir;

use std::io;
use std::io::ErrorKind;

use async_trait::async_trait;

/// A name-addressed, read-only store of files.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn open(&self, name: &str) -> io::Result<Box<dyn FileHandle>>;
}

/// An open file. Handles are single-owner (one per transmission) and are closed by drop.
///
/// `seek` has a default implementation that fails: a store whose handles cannot reposition
///  still works for the initial sequential stream, and retransmit / restart report the
///  missing capability as a regular file error.
#[async_trait]
pub trait FileHandle: Send {
    /// Size of the file in bytes.
    async fn size(&mut self) -> io::Result<u64>;

    /// Reads up to `buf.len()` bytes from the current position. Returning 0 means EOF.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Repositions to an absolute byte offset.
    async fn seek(&mut self, _offset: u64) -> io::Result<()> {
        Err(io::Error::new(ErrorKind::Unsupported, "file handle does not support seeking"))
    }
}

/// Reads until `buf` is full or EOF, whichever comes first. A single `read` may legitimately
///  return less than requested, but a block must never be split by a short read.
pub(crate) async fn read_full(file: &mut dyn FileHandle, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
