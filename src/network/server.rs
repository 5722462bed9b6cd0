//! PathNet Server
//!
//! Serves graph sessions over either transport. Each TCP connection owns its
//! session; UDP peers share a session table keyed by source address.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::connection::{Connection, ConnectionError};
use super::{NetworkConfig, Transport, MAX_DATAGRAM_SIZE};
use crate::dispatch::Dispatcher;
use crate::protocol::{
    decode_frame, decode_header, encode_frame, encode_header, encode_text, CodecResult, Command,
    Frame, MessageHeader, Status, HEADER_SIZE,
};
use crate::session::{Session, SessionKey, SessionTable};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started
    Started {
        bind_addr: SocketAddr,
        transport: Transport,
    },
    /// Server stopped
    Stopped,
    /// A client was seen for the first time
    SessionOpened { key: SessionKey, peer: SocketAddr },
    /// A session ended
    SessionClosed { key: SessionKey, reason: String },
    /// A request was answered
    RequestHandled {
        key: SessionKey,
        command: Command,
        status: Status,
    },
    /// Error occurred
    Error { message: String },
}

/// Receive buffer for one datagram; larger than any legal UDP payload
const RECV_BUFFER_SIZE: usize = 65_536;

/// PathNet Server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    dispatcher: Dispatcher,
    /// Datagram sessions
    sessions: Arc<SessionTable>,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Serving loop
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            dispatcher: Dispatcher::new(),
            sessions: Arc::new(SessionTable::new()),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            task: None,
            local_addr: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Datagram session table
    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Bind and start serving; returns the bound address
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.is_running().await {
            return Err(ServerError::AlreadyRunning);
        }

        let bind_addr = self.config.addr;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let task = match self.config.transport {
            Transport::Tcp => {
                let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
                    ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
                })?;
                let local_addr = listener.local_addr()?;
                self.local_addr = Some(local_addr);
                tokio::spawn(serve_tcp(
                    listener,
                    self.dispatcher.clone(),
                    self.event_tx.clone(),
                    shutdown_rx,
                    self.running.clone(),
                ))
            }
            Transport::Udp => {
                let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
                    ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
                })?;
                let local_addr = socket.local_addr()?;
                self.local_addr = Some(local_addr);
                let workers = Arc::new(Semaphore::new(self.config.udp_workers.max(1)));
                tokio::spawn(serve_udp(
                    Arc::new(socket),
                    self.dispatcher.clone(),
                    self.sessions.clone(),
                    workers,
                    self.event_tx.clone(),
                    shutdown_rx,
                    self.running.clone(),
                ))
            }
        };

        let local_addr = self.local_addr.unwrap_or(bind_addr);
        tracing::info!("Server listening on {} ({})", local_addr, self.config.transport);

        *self.running.write().await = true;
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);

        emit(
            &self.event_tx,
            ServerEvent::Started {
                bind_addr: local_addr,
                transport: self.config.transport,
            },
        );

        Ok(local_addr)
    }

    /// Stop the server and wait for the serving loop to wind down
    pub async fn stop(&mut self) -> ServerResult<()> {
        if !self.is_running().await {
            return Err(ServerError::NotRunning);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Server task failed: {}", e);
            }
        }

        Ok(())
    }
}

/// Publish an event without stalling request handling on a slow consumer
fn emit(event_tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if let Err(e) = event_tx.try_send(event) {
        tracing::trace!("Dropped server event: {}", e);
    }
}

async fn serve_tcp(
    listener: TcpListener,
    dispatcher: Dispatcher,
    event_tx: mpsc::Sender<ServerEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    running: Arc<RwLock<bool>>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tracing::info!("New connection from {}", addr);
                        connections.spawn(serve_connection(
                            stream,
                            addr,
                            dispatcher.clone(),
                            event_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        emit(&event_tx, ServerEvent::Error { message: e.to_string() });
                    }
                }
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Connection task failed: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Server shutdown requested");
                break;
            }
        }
    }

    connections.shutdown().await;
    *running.write().await = false;
    emit(&event_tx, ServerEvent::Stopped);
}

/// Serve one stream connection until exit, close or a framing error
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    event_tx: mpsc::Sender<ServerEvent>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }
    let key = SessionKey::new_connection();
    let mut conn = Connection::new(stream, addr);
    let mut session = Session::new();

    tracing::debug!("Session {} opened for {}", key, addr);
    emit(&event_tx, ServerEvent::SessionOpened { key, peer: addr });

    let reason = loop {
        let request = match conn.recv().await {
            Ok(Some(request)) => request,
            Ok(None) => break "Connection closed".to_string(),
            Err(ConnectionError::Protocol(e)) => {
                tracing::warn!("Protocol error from {}: {}", addr, e);
                let frame = Frame::new(
                    MessageHeader::new(Command::Error, Status::InvalidRequest, 0),
                    encode_text(&e.to_string()),
                );
                let _ = conn.send(&frame).await;
                break format!("Protocol error: {}", e);
            }
            Err(e) => break format!("Error: {}", e),
        };

        let reply = dispatcher.dispatch(&request, &mut session);
        emit(
            &event_tx,
            ServerEvent::RequestHandled {
                key,
                command: request.command(),
                status: reply.frame.status(),
            },
        );

        if let Err(e) = conn.send(&reply.frame).await {
            break format!("Send error: {}", e);
        }
        if reply.close {
            break "Client exited".to_string();
        }
    };

    let _ = conn.shutdown().await;
    tracing::info!("Session {} ({}) closed: {}", key, addr, reason);
    emit(&event_tx, ServerEvent::SessionClosed { key, reason });
}

async fn serve_udp(
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher,
    sessions: Arc<SessionTable>,
    workers: Arc<Semaphore>,
    event_tx: mpsc::Sender<ServerEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    running: Arc<RwLock<bool>>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut requests = JoinSet::new();

    loop {
        let (n, peer) = tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok(received) => received,
                    Err(e) => {
                        tracing::debug!("Datagram receive error: {}", e);
                        continue;
                    }
                }
            }
            Some(joined) = requests.join_next(), if !requests.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Request task failed: {}", e);
                }
                continue;
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Server shutdown requested");
                break;
            }
        };

        let datagram = &buf[..n];
        let header = match decode_header(&datagram[..n.min(HEADER_SIZE)]) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Dropping datagram from {}: {}", peer, e);
                continue;
            }
        };

        // Ack first; the answer is computed off the receive path
        let ack = encode_header(&MessageHeader::ack(header.request_id));
        if let Err(e) = socket.send_to(&ack, peer).await {
            tracing::warn!("Failed to ack request {} from {}: {}", header.request_id, peer, e);
        }

        let request = decode_frame(datagram);
        requests.spawn(handle_datagram(
            socket.clone(),
            peer,
            header,
            request,
            dispatcher.clone(),
            sessions.clone(),
            event_tx.clone(),
            workers.clone(),
        ));
    }

    requests.shutdown().await;
    *running.write().await = false;
    emit(&event_tx, ServerEvent::Stopped);
}

/// Process one acked datagram request and send its answer
///
/// Waits for a worker slot here rather than in the receive loop, so acks keep
/// flowing while every worker is busy.
#[allow(clippy::too_many_arguments)]
async fn handle_datagram(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    header: MessageHeader,
    request: CodecResult<Frame>,
    dispatcher: Dispatcher,
    sessions: Arc<SessionTable>,
    event_tx: mpsc::Sender<ServerEvent>,
    workers: Arc<Semaphore>,
) {
    let _permit = match workers.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };
    let key = SessionKey::Datagram(peer);

    let response = match request {
        Ok(request) => {
            let (session, created) = sessions.open(peer);
            if created {
                tracing::debug!("Session {} opened", key);
                emit(&event_tx, ServerEvent::SessionOpened { key, peer });
            }

            let reply = {
                let mut session = session.lock().await;
                dispatcher.dispatch(&request, &mut session)
            };
            emit(
                &event_tx,
                ServerEvent::RequestHandled {
                    key,
                    command: request.command(),
                    status: reply.frame.status(),
                },
            );

            if reply.close && sessions.remove(&peer) {
                tracing::info!("Session {} closed: Client exited", key);
                emit(
                    &event_tx,
                    ServerEvent::SessionClosed {
                        key,
                        reason: "Client exited".to_string(),
                    },
                );
            }
            reply.frame
        }
        Err(e) => {
            tracing::debug!("Malformed datagram from {}: {}", peer, e);
            Frame::new(
                MessageHeader::new(Command::Error, Status::InvalidRequest, header.request_id),
                encode_text(&e.to_string()),
            )
        }
    };

    let mut bytes = encode_frame(&response);
    if bytes.len() > MAX_DATAGRAM_SIZE {
        tracing::warn!(
            "Response to {} is {} bytes, too large for one datagram",
            peer,
            bytes.len()
        );
        bytes = encode_frame(&Frame::new(
            MessageHeader::new(Command::Error, Status::InternalError, header.request_id),
            encode_text("response too large for a datagram"),
        ));
    }

    if let Err(e) = socket.send_to(&bytes, peer).await {
        tracing::warn!("Failed to answer {}: {}", peer, e);
    }
}
