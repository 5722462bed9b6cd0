//! Network module - Handles TCP and UDP communication between client and server
//!
//! Provides:
//! - Exact-byte-count message framing over streams
//! - An ack/retry reliable channel over datagrams
//! - Server loops for both transports
//! - A client that speaks either transport

mod server;
mod client;
mod connection;
mod reliable;

pub use server::*;
pub use client::*;
pub use connection::*;
pub use reliable::*;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest payload that fits in one UDP datagram over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Transport selector shared by server and client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// Retry parameters of the datagram reliable channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliabilityConfig {
    /// How long each wait (for the ack, then for the answer) may last
    pub ack_timeout: Duration,
    /// Total number of transmissions before giving up
    pub max_attempts: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(3),
            max_attempts: 3,
        }
    }
}

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address to bind (server) or connect to (client)
    pub addr: SocketAddr,
    pub transport: Transport,
    pub reliability: ReliabilityConfig,
    /// Stream connect timeout (client)
    pub connect_timeout: Duration,
    /// Upper bound on datagram requests processed at once
    pub udp_workers: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], crate::protocol::DEFAULT_PORT)),
            transport: Transport::Tcp,
            reliability: ReliabilityConfig::default(),
            connect_timeout: Duration::from_secs(5),
            udp_workers: 8,
        }
    }
}

impl NetworkConfig {
    pub fn new(addr: SocketAddr, transport: Transport) -> Self {
        Self {
            addr,
            transport,
            ..Default::default()
        }
    }

    pub fn with_reliability(mut self, reliability: ReliabilityConfig) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_udp_workers(mut self, workers: usize) -> Self {
        self.udp_workers = workers.max(1);
        self
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
