use std::fmt::{Display, Formatter};

/// Wire-level category for an error, stable across error types. The string form is what
///  ends up in log fields, so it is snake_case and never changes spelling.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    Parse,
    InvalidFormat,
    UnknownInstruction,
    Validation,
    File,
    Network,
    Transmission,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Parse => "parse",
            ErrorCode::InvalidFormat => "invalid_format",
            ErrorCode::UnknownInstruction => "unknown_instruction",
            ErrorCode::Validation => "validation",
            ErrorCode::File => "file",
            ErrorCode::Network => "network",
            ErrorCode::Transmission => "transmission",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while decoding the textual TCP command grammar. These never terminate a
///  session: the session reports them back to the client as an `ERR` line and keeps reading.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// The byte stream did not conform to the grammar: wrong field count, or a non-numeric
    ///  token where a number was required.
    #[error("{op}: {detail}")]
    Parse { op: &'static str, detail: String },

    /// Structurally malformed input, e.g. an empty buffer or a whitespace-only line.
    #[error("{op}: {detail}")]
    InvalidFormat { op: &'static str, detail: String },

    #[error("unknown instruction: {token:?}")]
    UnknownInstruction { token: String },

    /// Syntactically fine but semantically rejected (zero blocksize, port out of range, ...).
    #[error("{op}: {detail}")]
    Validation { op: &'static str, detail: String },
}

impl ProtocolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Parse { .. } => ErrorCode::Parse,
            ProtocolError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            ProtocolError::UnknownInstruction { .. } => ErrorCode::UnknownInstruction,
            ProtocolError::Validation { .. } => ErrorCode::Validation,
        }
    }

    pub(crate) fn parse(op: &'static str, detail: impl Into<String>) -> ProtocolError {
        ProtocolError::Parse { op, detail: detail.into() }
    }

    pub(crate) fn invalid_format(op: &'static str, detail: impl Into<String>) -> ProtocolError {
        ProtocolError::InvalidFormat { op, detail: detail.into() }
    }

    pub(crate) fn validation(op: &'static str, detail: impl Into<String>) -> ProtocolError {
        ProtocolError::Validation { op, detail: detail.into() }
    }
}
