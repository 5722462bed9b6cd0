//! Session module - per-client graph slots
//!
//! A session holds at most one uploaded graph. Stream connections own their
//! session outright; datagram clients share a [`SessionTable`] keyed by their
//! socket address.
//!
//! The table never evicts entries on its own: a datagram session lives until the
//! client sends `Exit` or the server stops.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::graph::Graph;

/// Transport identity a session is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// One live stream connection
    Connection(Uuid),
    /// A datagram peer address
    Datagram(SocketAddr),
}

impl SessionKey {
    pub fn new_connection() -> Self {
        SessionKey::Connection(Uuid::new_v4())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Connection(id) => write!(f, "tcp/{}", id),
            SessionKey::Datagram(addr) => write!(f, "udp/{}", addr),
        }
    }
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoGraph,
    HasGraph,
}

/// Server-side record of one client
#[derive(Debug, Default)]
pub struct Session {
    graph: Option<Graph>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        if self.graph.is_some() {
            SessionState::HasGraph
        } else {
            SessionState::NoGraph
        }
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    /// Replace the graph slot wholesale
    pub fn replace_graph(&mut self, graph: Graph) {
        self.graph = Some(graph);
    }
}

/// Shared handle to one datagram session
pub type SharedSession = Arc<Mutex<Session>>;

/// Concurrent table of datagram sessions
///
/// The map is sharded; each entry carries its own lock so two requests from the
/// same address are serialized while different addresses proceed in parallel.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<SocketAddr, SharedSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for `addr`, creating an empty one on first contact
    pub fn get_or_create(&self, addr: SocketAddr) -> SharedSession {
        self.open(addr).0
    }

    /// Like [`get_or_create`](Self::get_or_create), also reporting whether the
    /// session was created by this call
    pub fn open(&self, addr: SocketAddr) -> (SharedSession, bool) {
        match self.sessions.entry(addr) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let session = Arc::new(Mutex::new(Session::new()));
                entry.insert(session.clone());
                (session, true)
            }
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<SharedSession> {
        self.sessions.get(addr).map(|entry| entry.value().clone())
    }

    /// Remove the session for `addr`; removing an absent session is a no-op
    pub fn remove(&self, addr: &SocketAddr) -> bool {
        self.sessions.remove(addr).is_some()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.sessions.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
