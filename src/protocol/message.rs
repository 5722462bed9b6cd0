//! Protocol message definitions
//!
//! Defines the header, command and status codes, and the typed payloads
//! exchanged between PathNet clients and servers.

use bytes::Bytes;
use std::fmt;

/// Command codes carried in the first header byte
///
/// Unrecognised codes are preserved as `Unknown` so the header still decodes
/// and the server can answer with a proper error instead of dropping the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Help,
    UploadGraph,
    PathQuery,
    PathResult,
    Error,
    Ack,
    Exit,
    Unknown(u8),
}

impl Command {
    /// Wire code of this command
    pub fn code(self) -> u8 {
        match self {
            Command::Help => 1,
            Command::UploadGraph => 2,
            Command::PathQuery => 3,
            Command::PathResult => 4,
            Command::Error => 5,
            Command::Ack => 6,
            Command::Exit => 7,
            Command::Unknown(code) => code,
        }
    }
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        match code {
            1 => Command::Help,
            2 => Command::UploadGraph,
            3 => Command::PathQuery,
            4 => Command::PathResult,
            5 => Command::Error,
            6 => Command::Ack,
            7 => Command::Exit,
            other => Command::Unknown(other),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unknown(code) => write!(f, "Unknown({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Status codes carried in the second header byte
///
/// Like `Command`, an out-of-range code survives decoding as `Unknown`; the
/// dispatcher rejects it with a proper `Error` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    InvalidRequest,
    InternalError,
    NotReady,
    Unknown(u8),
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::InvalidRequest => 1,
            Status::InternalError => 2,
            Status::NotReady => 3,
            Status::Unknown(code) => code,
        }
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        match code {
            0 => Status::Ok,
            1 => Status::InvalidRequest,
            2 => Status::InternalError,
            3 => Status::NotReady,
            other => Status::Unknown(other),
        }
    }
}

/// Fixed 12-byte message header
///
/// The reserved word is not represented: it is written as zero and ignored on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub command: Command,
    pub status: Status,
    /// Correlation id, only meaningful on the datagram transport
    pub request_id: u16,
    /// Number of payload bytes following the header
    pub payload_size: u32,
}

impl MessageHeader {
    pub fn new(command: Command, status: Status, request_id: u16) -> Self {
        Self {
            command,
            status,
            request_id,
            payload_size: 0,
        }
    }

    /// Header for a client request (status is always `Ok` on requests)
    pub fn request(command: Command, request_id: u16) -> Self {
        Self::new(command, Status::Ok, request_id)
    }

    /// Bare acknowledgement for the given request id
    pub fn ack(request_id: u16) -> Self {
        Self::new(Command::Ack, Status::Ok, request_id)
    }
}

/// A header together with its raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame, fixing up `payload_size` to match the payload
    pub fn new(mut header: MessageHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        header.payload_size = payload.len() as u32;
        Self { header, payload }
    }

    /// Frame with no payload
    pub fn empty(header: MessageHeader) -> Self {
        Self::new(header, Bytes::new())
    }

    pub fn command(&self) -> Command {
        self.header.command
    }

    pub fn status(&self) -> Status {
        self.header.status
    }

    pub fn request_id(&self) -> u16 {
        self.header.request_id
    }
}

/// Payload of `UploadGraph`: counts, packed incidence bits and edge weights
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadGraphPayload {
    pub vertex_count: u16,
    pub edge_count: u16,
    /// Incidence matrix packed vertex-major, one bit per cell
    pub incidence_bits: Vec<u8>,
    pub weights: Vec<u32>,
}

/// Payload of `PathQuery`: zero-based vertex indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathQueryPayload {
    pub source: u16,
    pub target: u16,
}

/// Payload of `PathResult`: total distance and the vertices in traversal order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResultPayload {
    pub distance: u32,
    pub path: Vec<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes_roundtrip() {
        for code in 0u8..=10 {
            assert_eq!(Command::from(code).code(), code);
        }
        assert_eq!(Command::from(3), Command::PathQuery);
        assert_eq!(Command::from(42), Command::Unknown(42));
    }

    #[test]
    fn test_status_codes() {
        for code in 0u8..=10 {
            assert_eq!(Status::from(code).code(), code);
        }
        assert_eq!(Status::from(3), Status::NotReady);
        assert_eq!(Status::from(9), Status::Unknown(9));
        assert_eq!(Status::InvalidRequest.code(), 1);
    }

    #[test]
    fn test_frame_sets_payload_size() {
        let frame = Frame::new(MessageHeader::request(Command::Help, 9), vec![1u8, 2, 3]);
        assert_eq!(frame.header.payload_size, 3);
        assert_eq!(frame.request_id(), 9);
    }
}
