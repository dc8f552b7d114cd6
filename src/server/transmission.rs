use std::fmt::{Debug, Formatter};
use std::io;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::FxHashSet;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::debug;

use crate::protocol::block::BlockFrame;
use crate::server::error::ServerError;
use crate::store::{read_full, FileStore};

/// The state of one active file transfer towards one client: an open file, a UDP socket
///  connected to the client's chosen port, and the set of blocks sent so far.
///
/// The control session and the background streaming task share a transmission through an
///  `Arc`, with all mutable state behind one async mutex. Individual block sends are
///  serialized through that mutex; the order of sends *across* concurrent operations (the
///  streaming loop vs. a retransmit handler) is deliberately unspecified, the client keeps
///  a received-block bitmap and tolerates interleavings.
pub struct Transmission {
    filename: String,
    block_size: u64,
    total_blocks: u64,
    progress_log_interval: u64,
    inner: Mutex<TransmissionInner>,
}

struct TransmissionInner {
    /// `None` once the transmission is closed; every subsequent operation fails.
    file: Option<Box<dyn crate::store::FileHandle>>,
    udp: Option<UdpSocket>,
    sent_blocks: FxHashSet<u64>,
}

impl Debug for Transmission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transmission{{filename:{:?}, block_size:{}, total_blocks:{}}}",
            self.filename, self.block_size, self.total_blocks
        )
    }
}

impl Transmission {
    /// Opens the named file and a connected UDP socket towards `(client_ip, udp_port)`,
    ///  returning the transmission and the file size in bytes. On failure nothing is left
    ///  open. `block_size` must have been validated as nonzero by the command decoder.
    pub async fn open(
        store: &dyn FileStore,
        client_ip: IpAddr,
        filename: &str,
        block_size: u64,
        udp_port: u16,
        progress_log_interval: u64,
    ) -> Result<(Arc<Transmission>, u64), ServerError> {
        let mut file = store
            .open(filename)
            .await
            .map_err(|e| ServerError::file("open file", filename, e))?;
        let file_size = file
            .size()
            .await
            .map_err(|e| ServerError::file("stat file", filename, e))?;
        let total_blocks = file_size.div_ceil(block_size);

        // bind an unspecified local address of the client's address family
        let local: SocketAddr = match client_ip {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let udp = UdpSocket::bind(local)
            .await
            .map_err(|e| ServerError::network("bind UDP socket", e))?;
        udp.connect((client_ip, udp_port))
            .await
            .map_err(|e| ServerError::network("connect UDP socket", e))?;

        let transmission = Transmission {
            filename: filename.to_string(),
            block_size,
            total_blocks,
            progress_log_interval,
            inner: Mutex::new(TransmissionInner {
                file: Some(file),
                udp: Some(udp),
                sent_blocks: FxHashSet::default(),
            }),
        };
        Ok((Arc::new(transmission), file_size))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    pub async fn is_block_sent(&self, block_index: u64) -> bool {
        self.inner.lock().await.sent_blocks.contains(&block_index)
    }

    pub async fn sent_block_count(&self) -> usize {
        self.inner.lock().await.sent_blocks.len()
    }

    /// The body of the background streaming task: emits every block in ascending index
    ///  order, reading the file sequentially. The lock is taken per block so that control
    ///  commands stay responsive during a long transfer. An EOF short read sends what was
    ///  read and stops.
    pub async fn stream(&self) -> Result<(), ServerError> {
        let mut buf = vec![0u8; self.block_size as usize];
        for block_index in 0..self.total_blocks {
            {
                let mut inner = self.inner.lock().await;
                let n = Self::read_block(&mut inner, &mut buf, block_index).await?;
                if n == 0 {
                    break;
                }
                Self::send_block(&mut inner, block_index, &buf[..n]).await?;
            }

            if self.progress_log_interval != 0 && block_index % self.progress_log_interval == 0 {
                debug!(
                    blocks_sent = block_index,
                    total_blocks = self.total_blocks,
                    "block transmission progress"
                );
            }
        }
        Ok(())
    }

    /// Re-sends a single block. Seeks, so the shared file handle must support seeking.
    pub async fn retransmit(&self, block_index: u64) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().await;
        if block_index >= self.total_blocks {
            return Err(ServerError::BlockOutOfRange { block_index, total_blocks: self.total_blocks });
        }

        self.seek_to_block(&mut inner, block_index).await?;

        let mut buf = vec![0u8; self.block_size as usize];
        let n = Self::read_block(&mut inner, &mut buf, block_index).await?;
        if n == 0 {
            return Err(ServerError::NoBlockData(block_index));
        }
        Self::send_block(&mut inner, block_index, &buf[..n]).await
    }

    /// Forgets all blocks from `block_index` onwards and re-streams them. The lock is held
    ///  for the whole run, so a concurrent streaming loop is stalled until the restart is
    ///  through.
    pub async fn restart_from(&self, block_index: u64) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().await;
        if block_index >= self.total_blocks {
            return Err(ServerError::BlockOutOfRange { block_index, total_blocks: self.total_blocks });
        }

        inner.sent_blocks.retain(|&i| i < block_index);
        self.seek_to_block(&mut inner, block_index).await?;

        let mut buf = vec![0u8; self.block_size as usize];
        for current_block in block_index..self.total_blocks {
            let n = Self::read_block(&mut inner, &mut buf, current_block).await?;
            if n == 0 {
                break;
            }
            Self::send_block(&mut inner, current_block, &buf[..n]).await?;
        }
        Ok(())
    }

    /// Drops the file handle and the UDP socket. Idempotent. A streaming task that is still
    ///  running observes the closed state on its next block and terminates with an error.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.file = None;
        inner.udp = None;
    }

    async fn seek_to_block(
        &self,
        inner: &mut TransmissionInner,
        block_index: u64,
    ) -> Result<(), ServerError> {
        let offset = block_index * self.block_size;
        let file = inner
            .file
            .as_mut()
            .ok_or_else(|| ServerError::transmission("seek file", block_index, closed_error()))?;
        file.seek(offset)
            .await
            .map_err(|e| ServerError::file("seek file", self.filename.as_str(), e))
    }

    async fn read_block(
        inner: &mut TransmissionInner,
        buf: &mut [u8],
        block_index: u64,
    ) -> Result<usize, ServerError> {
        let file = inner
            .file
            .as_mut()
            .ok_or_else(|| ServerError::transmission("read block", block_index, closed_error()))?;
        read_full(file.as_mut(), buf)
            .await
            .map_err(|e| ServerError::transmission("read block", block_index, e))
    }

    async fn send_block(
        inner: &mut TransmissionInner,
        block_index: u64,
        payload: &[u8],
    ) -> Result<(), ServerError> {
        let datagram = BlockFrame::new(block_index, Bytes::copy_from_slice(payload)).to_datagram();
        let udp = inner
            .udp
            .as_ref()
            .ok_or_else(|| ServerError::transmission("send block", block_index, closed_error()))?;
        udp.send(&datagram)
            .await
            .map_err(|e| ServerError::transmission("send block", block_index, e))?;
        inner.sent_blocks.insert(block_index);
        Ok(())
    }
}

fn closed_error() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "transmission closed")
}
