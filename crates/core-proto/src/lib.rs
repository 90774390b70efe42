//! Length-framed duplex messaging with the TeX worker.
//!
//! Every message is a four-byte ASCII tag, a little-endian `u32` of
//! milliseconds since the worker's root started, and a tag-specific payload.
//! Paths travel as zero-terminated strings, floats as little-endian IEEE 754
//! singles. `CHLD` additionally carries one file descriptor out-of-band via
//! `SCM_RIGHTS`.
//!
//! Queries arrive one at a time and each gets exactly one answer, so a
//! single [`Channel`] with small fixed buffers serves every worker in turn;
//! [`Channel::reset`] discards buffered bytes when the executor switches to
//! a different process's socket.
//!
//! A clean EOF at a message boundary reads as "worker died" (recoverable); a
//! short read inside a message or an unknown tag is a protocol violation and
//! aborts per the error policy.

mod channel;
mod message;

pub use channel::{Channel, ChannelError};
pub use message::{Answer, Ask, PicBounds, Query, QueryKind};

/// Handshake strings, exactly 12 bytes each.
pub const HANDSHAKE_SERVER: &[u8; 12] = b"TEXPRESSOS01";
pub const HANDSHAKE_CLIENT: &[u8; 12] = b"TEXPRESSOC01";

/// Environment variable carrying the worker's socket fd number.
pub const WORKER_FD_VAR: &str = "TEXPRESSO_FD";
