use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::protocol::error::ProtocolError;

/// The instruction token that starts every line on the control channel. `Invalid` is an
///  internal sentinel for "no valid instruction" and never appears on the wire.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Instruction {
    Get,
    Retr,
    Ok,
    Err,
    Rest,
    Done,
    Invalid,
}

impl Instruction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instruction::Get => "GET",
            Instruction::Retr => "RETR",
            Instruction::Ok => "OK",
            Instruction::Err => "ERR",
            Instruction::Rest => "REST",
            Instruction::Done => "DONE",
            Instruction::Invalid => "INVALID",
        }
    }

    /// Parses an instruction token, ignoring case and surrounding whitespace.
    pub fn parse(token: &str) -> Result<Instruction, ProtocolError> {
        match token.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Instruction::Get),
            "RETR" => Ok(Instruction::Retr),
            "OK" => Ok(Instruction::Ok),
            "ERR" => Ok(Instruction::Err),
            "REST" => Ok(Instruction::Rest),
            "DONE" => Ok(Instruction::Done),
            _ => Err(ProtocolError::UnknownInstruction { token: token.trim().to_string() }),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command on the TCP control channel. The wire form is a single LF-terminated line,
///  fields separated by single spaces on emit and by runs of whitespace on parse.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
    /// Client requests a file, choosing the payload size per datagram and the UDP port it
    ///  listens on.
    Get { filename: String, block_size: u64, udp_port: u64 },
    /// Server confirms a Get and reports the file size in bytes.
    Ok { file_size: u64 },
    /// Client asks for one block to be resent.
    Retr { block_index: u64 },
    /// Client asks for the transmission to be restarted from this block.
    Rest { block_index: u64 },
    /// Either side reports an error. The message may contain spaces but no newline.
    Err { message: String },
    /// Client signals completion.
    Done,
}

impl Command {
    pub fn instruction(&self) -> Instruction {
        match self {
            Command::Get { .. } => Instruction::Get,
            Command::Ok { .. } => Instruction::Ok,
            Command::Retr { .. } => Instruction::Retr,
            Command::Rest { .. } => Instruction::Rest,
            Command::Err { .. } => Instruction::Err,
            Command::Done => Instruction::Done,
        }
    }

    /// Emits the canonical wire form. Infallible: values that cannot round-trip (a filename
    ///  containing whitespace, a message containing a newline) are emitted as-is, it is the
    ///  caller's business to avoid them.
    pub fn encode(&self) -> Bytes {
        let line = match self {
            Command::Get { filename, block_size, udp_port } => {
                format!("{} {} {} {}\n", Instruction::Get, filename, block_size, udp_port)
            }
            Command::Ok { file_size } => format!("{} {}\n", Instruction::Ok, file_size),
            Command::Retr { block_index } => format!("{} {}\n", Instruction::Retr, block_index),
            Command::Rest { block_index } => format!("{} {}\n", Instruction::Rest, block_index),
            Command::Err { message } => format!("{} {}\n", Instruction::Err, message),
            Command::Done => format!("{}\n", Instruction::Done),
        };
        Bytes::from(line)
    }

    /// Decodes one command line: trims surrounding whitespace, dispatches on the first token
    ///  and delegates to the per-variant decoder. Anything beyond the first line is ignored.
    pub fn decode(data: &[u8]) -> Result<Command, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::invalid_format("decode command", "empty command data"));
        }
        let text = std::str::from_utf8(data)
            .map_err(|e| ProtocolError::invalid_format("decode command", e.to_string()))?;

        let line = text.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return Err(ProtocolError::invalid_format("decode command", "empty command"));
        }

        let first_token = line.split_whitespace().next().unwrap_or("");
        match Instruction::parse(first_token)? {
            Instruction::Get => Self::decode_get(line),
            Instruction::Ok => Self::decode_ok(line),
            Instruction::Retr => Self::decode_retr(line),
            Instruction::Rest => Self::decode_rest(line),
            Instruction::Err => Self::decode_err(line),
            Instruction::Done => Self::decode_done(line),
            Instruction::Invalid => unreachable!("parse never yields the sentinel"),
        }
    }

    fn decode_get(line: &str) -> Result<Command, ProtocolError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 4 {
            return Err(ProtocolError::parse(
                "GET command format",
                format!("expected 4 fields, got {}", parts.len()),
            ));
        }

        let filename = parts[1].to_string();
        let block_size = parse_u64("GET command format", "blocksize", parts[2])?;
        let udp_port = parse_u64("GET command format", "UDP port", parts[3])?;

        if filename.is_empty() {
            return Err(ProtocolError::validation("GET command", "filename cannot be empty"));
        }
        if block_size == 0 {
            return Err(ProtocolError::validation("GET command", "blocksize must be greater than 0"));
        }
        if udp_port == 0 || udp_port > 65535 {
            return Err(ProtocolError::validation(
                "GET command",
                format!("UDP port must be 1-65535, got {}", udp_port),
            ));
        }

        Ok(Command::Get { filename, block_size, udp_port })
    }

    fn decode_ok(line: &str) -> Result<Command, ProtocolError> {
        let file_size = decode_single_number(line, "OK command format", "filesize")?;
        Ok(Command::Ok { file_size })
    }

    fn decode_retr(line: &str) -> Result<Command, ProtocolError> {
        let block_index = decode_single_number(line, "RETR command format", "block index")?;
        Ok(Command::Retr { block_index })
    }

    fn decode_rest(line: &str) -> Result<Command, ProtocolError> {
        let block_index = decode_single_number(line, "REST command format", "block index")?;
        Ok(Command::Rest { block_index })
    }

    fn decode_err(line: &str) -> Result<Command, ProtocolError> {
        // the message may contain spaces: everything after the instruction token, trimmed
        let mut parts = line.splitn(2, char::is_whitespace);
        let _instruction = parts.next();
        let message = parts.next().map(str::trim).unwrap_or("").to_string();
        if message.is_empty() {
            return Err(ProtocolError::validation("ERR command", "error message cannot be empty"));
        }
        Ok(Command::Err { message })
    }

    fn decode_done(line: &str) -> Result<Command, ProtocolError> {
        let num_fields = line.split_whitespace().count();
        if num_fields != 1 {
            return Err(ProtocolError::parse(
                "DONE command format",
                format!("expected 1 field, got {}", num_fields),
            ));
        }
        Ok(Command::Done)
    }
}

fn decode_single_number(line: &str, op: &'static str, what: &str) -> Result<u64, ProtocolError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(ProtocolError::parse(op, format!("expected 2 fields, got {}", parts.len())));
    }
    parse_u64(op, what, parts[1])
}

fn parse_u64(op: &'static str, what: &str, token: &str) -> Result<u64, ProtocolError> {
    token
        .parse::<u64>()
        .map_err(|e| ProtocolError::parse(op, format!("invalid {} {:?}: {}", what, token, e)))
}
