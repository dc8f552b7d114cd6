use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::protocol::command::Command;
use crate::protocol::error::ErrorCode;
use crate::server::error::ServerError;
use crate::server::server::ServerShared;
use crate::server::transmission::Transmission;

/// Services one accepted control connection until the client disconnects. Whatever happens
///  inside, the registry entry for this client IP is removed on the way out, which closes
///  the file and the UDP socket and terminates a streaming task that may still be running.
#[tracing::instrument(name = "session", skip_all, fields(client_ip = %peer.ip(), client_port = peer.port()))]
pub(crate) async fn handle_connection(shared: Arc<ServerShared>, stream: TcpStream, peer: SocketAddr) {
    let client_ip = peer.ip();
    info!("client connected");

    let (read_half, write_half) = stream.into_split();
    let mut session = ClientSession {
        shared: shared.clone(),
        client_ip,
        lines: BufReader::new(read_half).lines(),
        writer: BufWriter::new(write_half),
    };

    if let Err(e) = session.run().await {
        error!(code = %e.code(), error = %e, "session error");
    }

    shared.registry.remove(client_ip).await;
    info!("client disconnected");
}

struct ClientSession {
    shared: Arc<ServerShared>,
    client_ip: IpAddr,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl ClientSession {
    /// The command loop. Returns Ok on a clean disconnect (EOF); an Err means the connection
    ///  itself failed. Malformed commands and failing handlers earn the client an ERR line
    ///  and the loop keeps reading.
    async fn run(&mut self) -> Result<(), ServerError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| ServerError::network("read command line", e))?;
            let line = match line {
                Some(line) => line,
                None => return Ok(()),
            };
            if line.is_empty() {
                continue;
            }

            let command = match Command::decode(line.as_bytes()) {
                Ok(command) => command,
                Err(e) => {
                    warn!(code = %e.code(), error = %e, "failed to parse command");
                    self.send_error(&e.to_string()).await?;
                    continue;
                }
            };

            if let Err(e) = self.dispatch(command).await {
                if e.code() == ErrorCode::Network {
                    return Err(e);
                }
                error!(code = %e.code(), error = %e, "command failed");
                self.send_error(&format!("Command failed: {}", e)).await?;
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Result<(), ServerError> {
        match command {
            Command::Get { filename, block_size, udp_port } => {
                self.handle_get(filename, block_size, udp_port).await
            }
            Command::Retr { block_index } => self.handle_retr(block_index).await,
            Command::Rest { block_index } => self.handle_rest(block_index).await,
            Command::Done => self.handle_done().await,
            other => Err(ServerError::UnsupportedCommand(other.instruction().as_str())),
        }
    }

    async fn handle_get(
        &mut self,
        filename: String,
        block_size: u64,
        udp_port: u64,
    ) -> Result<(), ServerError> {
        info!(filename = %filename, blocksize = block_size, udp_port, "GET request received");

        // the decoder guarantees 1..=65535
        let result = Transmission::open(
            self.shared.store.as_ref(),
            self.client_ip,
            &filename,
            block_size,
            udp_port as u16,
            self.shared.config.progress_log_interval,
        )
        .await;
        let (transmission, file_size) = match result {
            Ok(opened) => opened,
            Err(e) => {
                warn!(code = %e.code(), error = %e, filename = %filename, "failed to start transmission");
                return self.send_error(&e.to_string()).await;
            }
        };
        info!(filename = %filename, size = file_size, "file found");

        self.shared.registry.insert(self.client_ip, transmission.clone()).await;

        // the streaming task is spawned only after the OK reply is flushed, so the client
        // sees OK strictly before the first datagram
        self.send_command(&Command::Ok { file_size }).await?;

        info!(
            total_blocks = transmission.total_blocks(),
            block_size = transmission.block_size(),
            filename = transmission.filename(),
            "starting block transmission"
        );
        let client_ip = self.client_ip;
        tokio::spawn(async move {
            let result = transmission.stream().await;
            match result {
                Ok(()) => {
                    let blocks_sent = transmission.sent_block_count().await;
                    info!(
                        client_ip = %client_ip,
                        filename = transmission.filename(),
                        blocks_sent,
                        "file transmission completed"
                    )
                }
                Err(e) => warn!(
                    client_ip = %client_ip,
                    code = %e.code(),
                    error = %e,
                    "file transmission failed"
                ),
            }
        });

        Ok(())
    }

    async fn handle_retr(&mut self, block_index: u64) -> Result<(), ServerError> {
        debug!(block_index, "RETR request received");

        let transmission = match self.shared.registry.get(self.client_ip).await {
            Some(transmission) => transmission,
            None => {
                warn!("no active transmission for RETR request");
                return self.send_error("No active transmission").await;
            }
        };

        if let Err(e) = transmission.retransmit(block_index).await {
            error!(block_index, code = %e.code(), error = %e, "block retransmission failed");
            return self.send_error(&format!("Retransmission failed: {}", e)).await;
        }

        info!(block_index, "block retransmitted");
        Ok(())
    }

    async fn handle_rest(&mut self, block_index: u64) -> Result<(), ServerError> {
        debug!(block_index, "REST request received");

        let transmission = match self.shared.registry.get(self.client_ip).await {
            Some(transmission) => transmission,
            None => {
                warn!("no active transmission for REST request");
                return self.send_error("No active transmission").await;
            }
        };

        if let Err(e) = transmission.restart_from(block_index).await {
            error!(block_index, code = %e.code(), error = %e, "transmission restart failed");
            return self.send_error(&format!("Restart failed: {}", e)).await;
        }

        info!(block_index, "transmission restarted");
        Ok(())
    }

    async fn handle_done(&mut self) -> Result<(), ServerError> {
        info!("DONE received, transfer complete");
        self.shared.registry.remove(self.client_ip).await;
        debug!("transmission state cleaned up");
        Ok(())
    }

    async fn send_error(&mut self, message: &str) -> Result<(), ServerError> {
        self.send_command(&Command::Err { message: message.to_string() }).await
    }

    async fn send_command(&mut self, command: &Command) -> Result<(), ServerError> {
        self.writer
            .write_all(&command.encode())
            .await
            .map_err(|e| ServerError::network("send response", e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ServerError::network("flush response", e))
    }
}
