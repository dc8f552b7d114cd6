//! The Tsunami wire formats: the textual command grammar spoken on the TCP control channel,
//!  and the binary framing of data blocks on the UDP path. Pure data transformation, no I/O.

pub mod block;
pub mod command;
pub mod error;
