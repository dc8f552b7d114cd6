use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::protocol::error::ErrorCode;
use crate::server::config::ServerConfig;
use crate::server::registry::TransmissionRegistry;
use crate::server::session::handle_connection;
use crate::store::FileStore;

/// The state shared by the acceptor and every session: the file collaborator and the map of
///  live transmissions.
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) store: Arc<dyn FileStore>,
    pub(crate) registry: TransmissionRegistry,
}

/// A Tsunami file server: accepts control connections on TCP and streams file blocks over
///  UDP as directed by each client.
pub struct Server {
    listener: TcpListener,
    shutdown: Notify,
    shared: Arc<ServerShared>,
}

impl Server {
    pub async fn bind(config: ServerConfig, store: Arc<dyn FileStore>) -> anyhow::Result<Server> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Server::new(listener, config, store))
    }

    pub fn new(listener: TcpListener, config: ServerConfig, store: Arc<dyn FileStore>) -> Server {
        Server {
            listener,
            shutdown: Notify::new(),
            shared: Arc::new(ServerShared {
                config,
                store,
                registry: TransmissionRegistry::new(),
            }),
        }
    }

    /// The address actually bound, for embedders that bound port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &TransmissionRegistry {
        &self.shared.registry
    }

    /// Accepts connections until [Server::shut_down] is called, spawning one session task
    ///  per connection. A failed accept is logged and the loop continues; only shutdown
    ///  ends the loop, and it ends it cleanly.
    pub async fn listen(&self) -> anyhow::Result<()> {
        info!(address = %self.listener.local_addr()?, "tsunami server started");

        loop {
            select! {
                _ = self.shutdown.notified() => {
                    info!("listener closed, shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let shared = self.shared.clone();
                            tokio::spawn(async move {
                                handle_connection(shared, stream, peer).await;
                            });
                        }
                        Err(e) => {
                            error!(code = %ErrorCode::Network, error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    /// Makes a running [Server::listen] loop return cleanly. Sessions and streaming tasks
    ///  already spawned run on until their connections close.
    pub fn shut_down(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod test {
    use std::net::IpAddr;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{TcpSocket, TcpStream};
    use tokio::time::{sleep, timeout};

    use crate::test_util::store::MemStore;
    use crate::test_util::udp::UdpCapture;

    use super::*;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    async fn start_server(store: MemStore) -> (Arc<Server>, SocketAddr) {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Arc::new(Server::bind(config, Arc::new(store)).await.unwrap());
        let addr = server.local_addr().unwrap();
        let listen_server = server.clone();
        tokio::spawn(async move {
            listen_server.listen().await.ok();
        });
        (server, addr)
    }

    struct TestClient {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> TestClient {
            Self::from_stream(TcpStream::connect(addr).await.unwrap())
        }

        /// Connects from a specific loopback source address, so that two test clients can
        ///  have distinct registry keys.
        async fn connect_from(local_ip: IpAddr, addr: SocketAddr) -> TestClient {
            let socket = TcpSocket::new_v4().unwrap();
            socket.bind((local_ip, 0).into()).unwrap();
            Self::from_stream(socket.connect(addr).await.unwrap())
        }

        fn from_stream(stream: TcpStream) -> TestClient {
            let (read_half, write_half) = stream.into_split();
            TestClient {
                lines: BufReader::new(read_half).lines(),
                writer: write_half,
            }
        }

        async fn send_line(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn recv_line(&mut self) -> String {
            timeout(RECV_TIMEOUT, self.lines.next_line())
                .await
                .expect("timed out waiting for a reply line")
                .unwrap()
                .expect("connection closed while waiting for a reply")
        }
    }

    #[tokio::test]
    async fn test_small_file_single_get() {
        let store = MemStore::new().with_file("test.txt", &b"0123456789abcdefghij"[..]);
        let (_server, addr) = start_server(store).await;
        let capture = UdpCapture::bind().await.unwrap();

        let mut client = TestClient::connect(addr).await;
        client.send_line(&format!("GET test.txt 10 {}", capture.port())).await;
        assert_eq!(client.recv_line().await, "OK 20");

        let frames = capture.recv_frames(2).await.unwrap();
        assert_eq!(frames[0].block_index, 0);
        assert_eq!(&frames[0].payload[..], b"0123456789");
        assert_eq!(frames[0].wire_len(), 18);
        assert_eq!(frames[1].block_index, 1);
        assert_eq!(&frames[1].payload[..], b"abcdefghij");
        assert_eq!(frames[1].wire_len(), 18);
    }

    #[tokio::test]
    async fn test_retr_and_rest_over_control_channel() {
        let store = MemStore::new().with_file("x.bin", vec![b'x'; 100]);
        let (_server, addr) = start_server(store).await;
        let capture = UdpCapture::bind().await.unwrap();

        let mut client = TestClient::connect(addr).await;
        client.send_line(&format!("GET x.bin 10 {}", capture.port())).await;
        assert_eq!(client.recv_line().await, "OK 100");
        let _ = capture.recv_frames(10).await.unwrap();

        // RETR resends exactly one block
        client.send_line("RETR 5").await;
        let frame = capture.recv_frame().await.unwrap();
        assert_eq!(frame.block_index, 5);
        assert_eq!(&frame.payload[..], b"xxxxxxxxxx");

        // REST re-streams the tail
        client.send_line("REST 8").await;
        let frames = capture.recv_frames(2).await.unwrap();
        assert_eq!(frames[0].block_index, 8);
        assert_eq!(frames[1].block_index, 9);
        assert!(capture.no_traffic().await);
    }

    #[tokio::test]
    async fn test_done_cleans_up() {
        let store = MemStore::new().with_file("test.txt", &b"0123456789abcdefghij"[..]);
        let (server, addr) = start_server(store).await;
        let capture = UdpCapture::bind().await.unwrap();

        let mut client = TestClient::connect(addr).await;
        client.send_line(&format!("GET test.txt 10 {}", capture.port())).await;
        assert_eq!(client.recv_line().await, "OK 20");
        let _ = capture.recv_frames(2).await.unwrap();

        client.send_line("DONE").await;
        client.send_line("RETR 0").await;
        assert_eq!(client.recv_line().await, "ERR No active transmission");
        assert!(!server.registry().contains("127.0.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_bad_command_keeps_session_usable() {
        let store = MemStore::new().with_file("test.txt", &b"0123456789abcdefghij"[..]);
        let (_server, addr) = start_server(store).await;
        let capture = UdpCapture::bind().await.unwrap();

        let mut client = TestClient::connect(addr).await;

        client.send_line("BOGUS").await;
        let reply = client.recv_line().await;
        assert!(reply.starts_with("ERR "), "got: {}", reply);
        assert!(reply.contains("unknown instruction"), "got: {}", reply);

        client.send_line("   ").await;
        let reply = client.recv_line().await;
        assert!(reply.starts_with("ERR "), "got: {}", reply);

        client.send_line("OK 5").await;
        let reply = client.recv_line().await;
        assert!(reply.starts_with("ERR Command failed: unsupported command type"), "got: {}", reply);

        // the session is still good for a real transfer
        client.send_line(&format!("GET test.txt 10 {}", capture.port())).await;
        assert_eq!(client.recv_line().await, "OK 20");
        let frames = capture.recv_frames(2).await.unwrap();
        assert_eq!(frames[1].block_index, 1);
    }

    #[tokio::test]
    async fn test_get_missing_file_reports_err() {
        let store = MemStore::new();
        let (server, addr) = start_server(store).await;
        let capture = UdpCapture::bind().await.unwrap();

        let mut client = TestClient::connect(addr).await;
        client.send_line(&format!("GET nope.bin 10 {}", capture.port())).await;
        let reply = client.recv_line().await;
        assert!(reply.starts_with("ERR "), "got: {}", reply);
        assert!(!server.registry().contains("127.0.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_concurrent_clients_do_not_cross_contaminate() {
        let store = MemStore::new()
            .with_file("a.bin", vec![0xAAu8; 200])
            .with_file("b.bin", vec![0xBBu8; 200]);
        let (_server, addr) = start_server(store).await;

        let capture_a = UdpCapture::bind().await.unwrap();
        let capture_b = UdpCapture::bind_on("127.0.0.2".parse().unwrap()).await.unwrap();

        let mut client_a = TestClient::connect_from("127.0.0.1".parse().unwrap(), addr).await;
        let mut client_b = TestClient::connect_from("127.0.0.2".parse().unwrap(), addr).await;

        client_a.send_line(&format!("GET a.bin 20 {}", capture_a.port())).await;
        client_b.send_line(&format!("GET b.bin 20 {}", capture_b.port())).await;
        assert_eq!(client_a.recv_line().await, "OK 200");
        assert_eq!(client_b.recv_line().await, "OK 200");

        let frames_a = capture_a.recv_frames(10).await.unwrap();
        let frames_b = capture_b.recv_frames(10).await.unwrap();
        for (i, frame) in frames_a.iter().enumerate() {
            assert_eq!(frame.block_index, i as u64);
            assert_eq!(&frame.payload[..], &[0xAAu8; 20]);
        }
        for (i, frame) in frames_b.iter().enumerate() {
            assert_eq!(frame.block_index, i as u64);
            assert_eq!(&frame.payload[..], &[0xBBu8; 20]);
        }
    }

    #[tokio::test]
    async fn test_disconnect_removes_registry_entry() {
        let store = MemStore::new().with_file("test.txt", &b"0123456789abcdefghij"[..]);
        let (server, addr) = start_server(store).await;
        let capture = UdpCapture::bind().await.unwrap();

        let mut client = TestClient::connect(addr).await;
        client.send_line(&format!("GET test.txt 10 {}", capture.port())).await;
        assert_eq!(client.recv_line().await, "OK 20");
        let _ = capture.recv_frames(2).await.unwrap();

        drop(client);

        let client_ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..50 {
            if !server.registry().contains(client_ip).await {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!("registry entry was not removed after disconnect");
    }

    #[tokio::test]
    async fn test_shut_down_ends_listen_cleanly() {
        let store = MemStore::new();
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Arc::new(Server::bind(config, Arc::new(store)).await.unwrap());

        let listen_server = server.clone();
        let handle = tokio::spawn(async move { listen_server.listen().await });

        server.shut_down();
        let result = timeout(RECV_TIMEOUT, handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
