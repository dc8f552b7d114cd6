use std::io;

use crate::protocol::error::{ErrorCode, ProtocolError};

/// Errors raised while servicing a client: filesystem trouble, socket trouble, and failures
///  inside a streaming or restart run. Every variant maps onto one of the wire-level
///  [ErrorCode] categories, which is what the session puts into its log fields.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{op} {name:?}: {source}")]
    File { op: &'static str, name: String, source: io::Error },

    #[error("{op}: {source}")]
    Network { op: &'static str, source: io::Error },

    #[error("block index {block_index} out of range (total blocks: {total_blocks})")]
    BlockOutOfRange { block_index: u64, total_blocks: u64 },

    #[error("no data to retransmit for block {0}")]
    NoBlockData(u64),

    #[error("{op} at block {block_index}: {source}")]
    Transmission { op: &'static str, block_index: u64, source: io::Error },

    #[error("unsupported command type: {0}")]
    UnsupportedCommand(&'static str),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::File { .. } => ErrorCode::File,
            ServerError::Network { .. } => ErrorCode::Network,
            ServerError::BlockOutOfRange { .. } => ErrorCode::Validation,
            ServerError::NoBlockData(_) => ErrorCode::Transmission,
            ServerError::Transmission { .. } => ErrorCode::Transmission,
            ServerError::UnsupportedCommand(_) => ErrorCode::Validation,
            ServerError::Protocol(e) => e.code(),
        }
    }

    pub(crate) fn file(op: &'static str, name: impl Into<String>, source: io::Error) -> ServerError {
        ServerError::File { op, name: name.into(), source }
    }

    pub(crate) fn network(op: &'static str, source: io::Error) -> ServerError {
        ServerError::Network { op, source }
    }

    pub(crate) fn transmission(op: &'static str, block_index: u64, source: io::Error) -> ServerError {
        ServerError::Transmission { op, block_index, source }
    }
}
