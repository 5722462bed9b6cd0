//! PathNet Client
//!
//! Talks to a PathNet server over either transport. Every operation is a single
//! request/response exchange; over UDP the reliable channel adds acks and
//! retransmission.

use std::net::SocketAddr;

use bytes::Bytes;
use thiserror::Error;

use super::connection::{Connection, ConnectionError};
use super::reliable::{ChannelError, ReliableChannel, UdpPeer};
use super::{resolve_host, NetworkConfig, Transport};
use crate::graph::Graph;
use crate::protocol::{
    decode_path_result, decode_text, encode_path_query, encode_upload_graph, CodecError, Command,
    Frame, MessageHeader, PathQueryPayload, PathResultPayload, Status,
};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("{0}")]
    Channel(#[from] ChannelError),

    #[error("Malformed response: {0}")]
    Codec(#[from] CodecError),

    #[error("Unexpected {command} response to request {request_id}")]
    UnexpectedResponse { command: Command, request_id: u16 },

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection timeout")]
    Timeout,
}

impl ClientError {
    /// Server gave no answer after every retransmission
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Channel(ChannelError::Unreachable { .. }))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connected,
}

/// Decoded server answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Human-readable text (help, upload confirmation, farewell)
    Text(String),
    /// Shortest path found
    Path(PathResultPayload),
    /// Server answered with an `Error` message
    Rejected { status: Status, message: String },
}

enum Link {
    Stream(Connection),
    Datagram(ReliableChannel<UdpPeer>),
}

/// PathNet Client
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    link: Option<Link>,
    server_addr: Option<SocketAddr>,
    /// Request ids for the stream transport
    next_request_id: u16,
}

impl Client {
    /// Create a new client
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            link: None,
            server_addr: None,
            next_request_id: 1,
        }
    }

    pub fn transport(&self) -> Transport {
        self.config.transport
    }

    pub fn state(&self) -> ClientState {
        if self.link.is_some() {
            ClientState::Connected
        } else {
            ClientState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server_addr
    }

    /// Connect to a server by address
    ///
    /// Over UDP this only binds a local socket; the server is first contacted
    /// by the next request.
    pub async fn connect(&mut self, server_addr: SocketAddr) -> ClientResult<()> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        tracing::info!("Connecting to {} over {}", server_addr, self.config.transport);

        let link = match self.config.transport {
            Transport::Tcp => {
                let conn = tokio::time::timeout(
                    self.config.connect_timeout,
                    Connection::connect(server_addr),
                )
                .await
                .map_err(|_| ClientError::Timeout)??;
                Link::Stream(conn)
            }
            Transport::Udp => {
                let peer = UdpPeer::bind(server_addr).await?;
                tracing::debug!("Datagram socket bound to {}", peer.local_addr()?);
                Link::Datagram(ReliableChannel::new(peer, self.config.reliability))
            }
        };

        self.link = Some(link);
        self.server_addr = Some(server_addr);
        Ok(())
    }

    /// Connect to a server by hostname
    pub async fn connect_hostname(&mut self, hostname: &str, port: u16) -> ClientResult<()> {
        let addr = resolve_host(hostname, port).await?;
        self.connect(addr).await
    }

    /// Drop the link without telling the server
    pub async fn disconnect(&mut self) -> ClientResult<()> {
        match self.link.take() {
            Some(Link::Stream(mut conn)) => {
                let _ = conn.shutdown().await;
                Ok(())
            }
            Some(Link::Datagram(_)) => Ok(()),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Ask the server for its command list
    pub async fn help(&mut self) -> ClientResult<Response> {
        self.call(Command::Help, Bytes::new()).await
    }

    /// Upload `graph`, replacing any graph the session already holds
    pub async fn upload_graph(&mut self, graph: &Graph) -> ClientResult<Response> {
        let payload = encode_upload_graph(&graph.to_payload());
        self.call(Command::UploadGraph, payload).await
    }

    /// Ask for the shortest path from `source` to `target`
    pub async fn query(&mut self, source: u16, target: u16) -> ClientResult<Response> {
        let payload = encode_path_query(&PathQueryPayload { source, target });
        self.call(Command::PathQuery, payload).await
    }

    /// End the session; the link is dropped whatever the outcome
    pub async fn exit(&mut self) -> ClientResult<Response> {
        let result = self.call(Command::Exit, Bytes::new()).await;
        if self.is_connected() {
            self.disconnect().await?;
        }
        result
    }

    async fn call(&mut self, command: Command, payload: Bytes) -> ClientResult<Response> {
        let frame = match self.link.as_mut() {
            Some(Link::Stream(conn)) => {
                let request_id = self.next_request_id;
                self.next_request_id = self.next_request_id.wrapping_add(1);
                let request = Frame::new(MessageHeader::request(command, request_id), payload);
                let response = conn.request(&request).await?;
                if response.request_id() != request_id {
                    return Err(ClientError::UnexpectedResponse {
                        command: response.command(),
                        request_id: response.request_id(),
                    });
                }
                response
            }
            Some(Link::Datagram(channel)) => channel.request(command, payload).await?,
            None => return Err(ClientError::NotConnected),
        };

        tracing::debug!(
            "{} -> {} / {:?}",
            command,
            frame.command(),
            frame.status()
        );
        interpret(command, frame)
    }
}

/// Map a response frame to what the caller asked for
fn interpret(request: Command, frame: Frame) -> ClientResult<Response> {
    match frame.command() {
        Command::Error => Ok(Response::Rejected {
            status: frame.status(),
            message: decode_text(&frame.payload)?,
        }),
        Command::PathResult if request == Command::PathQuery => {
            Ok(Response::Path(decode_path_result(&frame.payload)?))
        }
        command if command == request && request != Command::PathQuery => {
            Ok(Response::Text(decode_text(&frame.payload)?))
        }
        command => Err(ClientError::UnexpectedResponse {
            command,
            request_id: frame.request_id(),
        }),
    }
}
