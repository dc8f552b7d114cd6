use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    /// During a streaming run, a progress line is logged every this many blocks.
    pub progress_log_interval: u64,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            bind_addr,
            progress_log_interval: 100,
        }
    }
}
