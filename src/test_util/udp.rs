use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::protocol::block::BlockFrame;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE_WINDOW: Duration = Duration::from_millis(200);

/// A loopback UDP socket that plays the client side of the data path: it captures the
///  datagrams a transmission emits and parses them back into [BlockFrame]s.
pub struct UdpCapture {
    socket: UdpSocket,
}

impl UdpCapture {
    pub async fn bind() -> anyhow::Result<UdpCapture> {
        Self::bind_on(IpAddr::V4(Ipv4Addr::LOCALHOST)).await
    }

    /// Binds on a specific address, e.g. a secondary loopback address so two captures can
    ///  represent two distinct client IPs.
    pub async fn bind_on(ip: IpAddr) -> anyhow::Result<UdpCapture> {
        let socket = UdpSocket::bind((ip, 0)).await?;
        Ok(UdpCapture { socket })
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().expect("freshly bound socket has a local address").port()
    }

    pub async fn recv_frame(&self) -> anyhow::Result<BlockFrame> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = timeout(RECV_TIMEOUT, self.socket.recv(&mut buf)).await??;
        BlockFrame::try_read(&mut &buf[..n])
    }

    pub async fn recv_frames(&self, n: usize) -> anyhow::Result<Vec<BlockFrame>> {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(self.recv_frame().await?);
        }
        Ok(frames)
    }

    /// True if nothing arrives within a short window. For asserting that an operation did
    ///  *not* emit traffic.
    pub async fn no_traffic(&self) -> bool {
        let mut buf = [0u8; 64 * 1024];
        timeout(SILENCE_WINDOW, self.socket.recv(&mut buf)).await.is_err()
    }
}
