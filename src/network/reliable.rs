//! Reliable request/response exchange over datagrams
//!
//! Each request carries a 16-bit id. The client sends the request as one datagram
//! and waits up to the ack timeout for a datagram with the same id:
//!
//! ```text
//!             send (attempt n)
//!                   |
//!                   v
//!   +---------- AwaitingAck ----------+
//!   | Ack(id)                         | non-Ack(id)
//!   v                                 v
//! AwaitingResponse --non-Ack(id)--> answer
//!   |
//!   | timeout (either state)
//!   v
//! resend identical datagram, until max_attempts
//! ```
//!
//! Datagrams with another id, undecodable datagrams and duplicate acks are
//! discarded without restarting the running wait. The server side acks every
//! valid request before processing it, so handlers must tolerate re-delivery.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use super::{ReliabilityConfig, MAX_DATAGRAM_SIZE};
use crate::protocol::{decode_frame, encode_frame, Command, Frame, MessageHeader};

/// Reliable channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Datagram too large: {size} bytes (max: {max})")]
    DatagramTooLarge { size: usize, max: usize },

    #[error("No response after {attempts} attempts")]
    Unreachable { attempts: u32 },
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Raw datagram I/O towards one peer
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    /// Send one datagram to the peer
    async fn send_datagram(&self, datagram: &[u8]) -> io::Result<()>;

    /// Receive one datagram from the peer, returning its length
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// UDP socket bound to an ephemeral port and talking to a single server
#[derive(Debug)]
pub struct UdpPeer {
    socket: UdpSocket,
    server: SocketAddr,
}

impl UdpPeer {
    /// Bind an ephemeral local port in the server's address family
    pub async fn bind(server: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self { socket, server })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramSocket for UdpPeer {
    async fn send_datagram(&self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, self.server).await?;
        Ok(())
    }

    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (n, from) = self.socket.recv_from(buf).await?;
            if from == self.server {
                return Ok(n);
            }
            tracing::debug!("Ignoring datagram from unexpected peer {}", from);
        }
    }
}

/// Phase of one outstanding exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    AwaitingAck,
    AwaitingResponse,
}

/// What an inbound datagram meant for the outstanding exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Not ours, stale, duplicate or corrupt
    Discard,
    /// Server acknowledged; a fresh wait for the answer begins
    Acked,
    /// The answer to our request
    Answer(Frame),
}

/// State of a single request awaiting its answer
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request_id: u16,
    state: Exchange,
    attempts: u32,
}

impl PendingRequest {
    pub fn new(request_id: u16) -> Self {
        Self {
            request_id,
            state: Exchange::AwaitingAck,
            attempts: 0,
        }
    }

    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    pub fn state(&self) -> Exchange {
        self.state
    }

    /// Number of transmissions so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a (re)transmission; the exchange starts over at `AwaitingAck`
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.state = Exchange::AwaitingAck;
    }

    /// Classify an inbound datagram
    pub fn on_datagram(&mut self, datagram: &[u8]) -> Step {
        let frame = match decode_frame(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Discarding undecodable datagram: {}", e);
                return Step::Discard;
            }
        };
        if frame.request_id() != self.request_id {
            tracing::debug!(
                "Discarding {} for request {} while waiting on {}",
                frame.command(),
                frame.request_id(),
                self.request_id
            );
            return Step::Discard;
        }

        match (self.state, frame.command()) {
            (Exchange::AwaitingAck, Command::Ack) => {
                self.state = Exchange::AwaitingResponse;
                Step::Acked
            }
            (Exchange::AwaitingResponse, Command::Ack) => Step::Discard,
            (_, _) => Step::Answer(frame),
        }
    }
}

/// Client side of the reliable datagram channel
pub struct ReliableChannel<S> {
    socket: S,
    config: ReliabilityConfig,
    next_request_id: u16,
    recv_buf: Vec<u8>,
}

impl<S: DatagramSocket> ReliableChannel<S> {
    pub fn new(socket: S, config: ReliabilityConfig) -> Self {
        Self {
            socket,
            config,
            next_request_id: 1,
            recv_buf: vec![0u8; 65_536],
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    /// Allocate the next request id; the counter wraps after 65535
    pub fn next_request_id(&mut self) -> u16 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    /// Send `command` with a fresh request id and wait for its answer
    pub async fn request(&mut self, command: Command, payload: impl Into<bytes::Bytes>) -> ChannelResult<Frame> {
        let request_id = self.next_request_id();
        let frame = Frame::new(MessageHeader::request(command, request_id), payload);
        self.exchange(&frame).await
    }

    /// Deliver a prepared frame, retransmitting the identical datagram on timeout
    pub async fn exchange(&mut self, frame: &Frame) -> ChannelResult<Frame> {
        let datagram = encode_frame(frame);
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(ChannelError::DatagramTooLarge {
                size: datagram.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let mut pending = PendingRequest::new(frame.request_id());
        while pending.attempts() < self.config.max_attempts {
            pending.begin_attempt();
            self.socket.send_datagram(&datagram).await?;

            if let Some(answer) = self.await_answer(&mut pending).await? {
                return Ok(answer);
            }
            tracing::debug!(
                "No answer to request {} ({:?}), attempt {}/{}",
                pending.request_id(),
                pending.state(),
                pending.attempts(),
                self.config.max_attempts
            );
        }

        tracing::warn!(
            "Request {} abandoned after {} attempts",
            pending.request_id(),
            pending.attempts()
        );
        Err(ChannelError::Unreachable {
            attempts: pending.attempts(),
        })
    }

    /// Run both waits of one attempt; `None` means the attempt timed out
    async fn await_answer(&mut self, pending: &mut PendingRequest) -> ChannelResult<Option<Frame>> {
        let mut deadline = Instant::now() + self.config.ack_timeout;
        loop {
            let received = timeout_at(deadline, self.socket.recv_datagram(&mut self.recv_buf)).await;
            let n = match received {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(n)) => n,
                Ok(Err(e)) if is_transient(&e) => {
                    tracing::debug!("Transient receive error: {}", e);
                    continue;
                }
                Ok(Err(e)) => return Err(e.into()),
            };

            match pending.on_datagram(&self.recv_buf[..n]) {
                Step::Discard => {}
                Step::Acked => {
                    tracing::debug!("Request {} acknowledged", pending.request_id());
                    deadline = Instant::now() + self.config.ack_timeout;
                }
                Step::Answer(frame) => return Ok(Some(frame)),
            }
        }
    }
}

/// ICMP-driven errors some platforms surface on the next receive
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}
