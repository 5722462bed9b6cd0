//! Protocol module - Defines the wire protocol for PathNet communication
//!
//! Every message is a fixed 12-byte header followed by a command-specific payload:
//! - 1 byte command
//! - 1 byte status
//! - 2 bytes request id (big-endian)
//! - 4 bytes payload length (big-endian)
//! - 4 bytes reserved, always zero
//!
//! The same layout is used on the stream transport and inside UDP datagrams.

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Size of the fixed message header in bytes
pub const HEADER_SIZE: usize = 12;

/// Largest payload a header may announce (1 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;

/// Default port for PathNet communication
pub const DEFAULT_PORT: u16 = 5555;
