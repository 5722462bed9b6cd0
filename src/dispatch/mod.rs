//! Dispatch module - turns a request plus session state into a response
//!
//! The dispatcher is shared by both transports. It never fails: decode,
//! validation and state errors all become a well-formed `Error` frame and the
//! session keeps being served.

use bytes::Bytes;
use thiserror::Error;

use crate::graph::{self, Graph, GraphError};
use crate::protocol::{
    decode_path_query, decode_upload_graph, encode_path_result, encode_text, CodecError, Command,
    Frame, MessageHeader, PathResultPayload, Status,
};
use crate::session::Session;

/// Text returned for `Help`
pub const HELP_TEXT: &str = "Commands:\n\
    \x20 help          - list available commands\n\
    \x20 upload_graph  - upload a graph (incidence matrix + weights)\n\
    \x20 path_query    - find the shortest path between two vertices\n\
    \x20 exit          - end the session\n\
    Vertices are numbered from 0.\n";

/// Confirmation returned for a successful `UploadGraph`
pub const GRAPH_ACCEPTED_TEXT: &str = "Graph accepted by server.";

/// Farewell returned for `Exit`
pub const FAREWELL_TEXT: &str = "Goodbye.";

/// Machine-checkable category of a rejected request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Payload could not be decoded
    Decode,
    /// Payload decoded but broke a domain rule
    Validation,
    /// Session lacks the state the command needs
    NotReady,
    /// Target vertex cannot be reached
    Unreachable,
    /// Command is not accepted from clients
    UnknownCommand,
    /// Server-side failure unrelated to the request
    Internal,
}

impl ErrorKind {
    /// Wire status reported for this kind
    pub fn status(self) -> Status {
        match self {
            ErrorKind::Decode | ErrorKind::Validation | ErrorKind::UnknownCommand => {
                Status::InvalidRequest
            }
            ErrorKind::NotReady | ErrorKind::Unreachable => Status::NotReady,
            ErrorKind::Internal => Status::InternalError,
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Decode => "malformed payload",
            ErrorKind::Validation => "invalid request",
            ErrorKind::NotReady => "no graph loaded, upload a graph first",
            ErrorKind::Unreachable => "path not found",
            ErrorKind::UnknownCommand => "unknown command",
            ErrorKind::Internal => "internal error",
        }
    }
}

/// A rejected request: kind plus optional human-readable detail
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", self.message())]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub detail: Option<String>,
}

impl DispatchError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// Text sent to the peer
    pub fn message(&self) -> String {
        match &self.detail {
            Some(detail) => detail.clone(),
            None => self.kind.default_message().to_string(),
        }
    }
}

impl From<CodecError> for DispatchError {
    fn from(e: CodecError) -> Self {
        DispatchError::with_detail(ErrorKind::Decode, e.to_string())
    }
}

impl From<GraphError> for DispatchError {
    fn from(e: GraphError) -> Self {
        let kind = match e {
            GraphError::NoPath { .. } => ErrorKind::Unreachable,
            GraphError::Uninitialized => ErrorKind::NotReady,
            GraphError::DistanceOverflow => ErrorKind::Internal,
            _ => ErrorKind::Validation,
        };
        DispatchError::with_detail(kind, e.to_string())
    }
}

/// Response produced for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub frame: Frame,
    /// The session ends once this reply is sent
    pub close: bool,
}

impl Reply {
    fn new(command: Command, request_id: u16, payload: Bytes) -> Self {
        Self {
            frame: Frame::new(MessageHeader::new(command, Status::Ok, request_id), payload),
            close: false,
        }
    }

    fn error(error: &DispatchError, request_id: u16) -> Self {
        Self {
            frame: Frame::new(
                MessageHeader::new(Command::Error, error.kind.status(), request_id),
                encode_text(&error.message()),
            ),
            close: false,
        }
    }
}

/// Maps inbound commands to session actions
#[derive(Debug, Clone, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Handle one request against `session`
    pub fn dispatch(&self, request: &Frame, session: &mut Session) -> Reply {
        let request_id = request.request_id();
        let reply = match self.handle(request, session) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!("Rejected {} request: {:?} ({})", request.command(), e.kind, e);
                Reply::error(&e, request_id)
            }
        };
        tracing::debug!(
            "{} -> {} / {:?} ({} bytes)",
            request.command(),
            reply.frame.command(),
            reply.frame.status(),
            reply.frame.payload.len()
        );
        reply
    }

    fn handle(&self, request: &Frame, session: &mut Session) -> Result<Reply, DispatchError> {
        let request_id = request.request_id();
        if let Status::Unknown(code) = request.status() {
            return Err(DispatchError::with_detail(
                ErrorKind::Decode,
                format!("unknown status code {}", code),
            ));
        }
        match request.command() {
            Command::Help => Ok(Reply::new(Command::Help, request_id, encode_text(HELP_TEXT))),
            Command::UploadGraph => {
                let graph = Self::decode_graph(&request.payload)?;
                session.replace_graph(graph);
                Ok(Reply::new(
                    Command::UploadGraph,
                    request_id,
                    encode_text(GRAPH_ACCEPTED_TEXT),
                ))
            }
            Command::PathQuery => {
                let query = decode_path_query(&request.payload)?;
                let graph = session
                    .graph()
                    .ok_or_else(|| DispatchError::new(ErrorKind::NotReady))?;
                let found = graph::shortest_path(graph, query.source, query.target)?;
                let payload = encode_path_result(&PathResultPayload {
                    distance: found.distance,
                    path: found.path,
                })
                .map_err(|e| DispatchError::with_detail(ErrorKind::Internal, e.to_string()))?;
                Ok(Reply::new(Command::PathResult, request_id, payload))
            }
            Command::Exit => {
                let mut reply = Reply::new(Command::Exit, request_id, encode_text(FAREWELL_TEXT));
                reply.close = true;
                Ok(reply)
            }
            Command::PathResult | Command::Error | Command::Ack | Command::Unknown(_) => {
                Err(DispatchError::new(ErrorKind::UnknownCommand))
            }
        }
    }

    fn decode_graph(payload: &[u8]) -> Result<Graph, DispatchError> {
        let decoded = decode_upload_graph(payload)?;
        let graph = Graph::from_payload(decoded)?;
        graph::validate(&graph)?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        decode_path_result, decode_text, encode_path_query, encode_upload_graph, PathQueryPayload,
    };
    use crate::session::SessionState;

    fn cycle6() -> Graph {
        Graph::from_edges(
            6,
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1), (4, 5, 1), (5, 0, 1)],
        )
    }

    fn upload(graph: &Graph, id: u16) -> Frame {
        Frame::new(
            MessageHeader::request(Command::UploadGraph, id),
            encode_upload_graph(&graph.to_payload()),
        )
    }

    fn query(source: u16, target: u16, id: u16) -> Frame {
        Frame::new(
            MessageHeader::request(Command::PathQuery, id),
            encode_path_query(&PathQueryPayload { source, target }),
        )
    }

    #[test]
    fn test_help() {
        let reply = Dispatcher::new().dispatch(
            &Frame::empty(MessageHeader::request(Command::Help, 4)),
            &mut Session::new(),
        );
        assert_eq!(reply.frame.command(), Command::Help);
        assert_eq!(reply.frame.status(), Status::Ok);
        assert_eq!(reply.frame.request_id(), 4);
        assert_eq!(decode_text(&reply.frame.payload).unwrap(), HELP_TEXT);
        assert!(!reply.close);
    }

    #[test]
    fn test_upload_then_query() {
        let dispatcher = Dispatcher::new();
        let mut session = Session::new();

        let reply = dispatcher.dispatch(&upload(&cycle6(), 1), &mut session);
        assert_eq!(reply.frame.command(), Command::UploadGraph);
        assert_eq!(reply.frame.status(), Status::Ok);
        assert_eq!(session.state(), SessionState::HasGraph);

        let reply = dispatcher.dispatch(&query(0, 3, 2), &mut session);
        assert_eq!(reply.frame.command(), Command::PathResult);
        let result = decode_path_result(&reply.frame.payload).unwrap();
        assert_eq!(result.distance, 3);
        assert_eq!(result.path, vec![0, 1, 2, 3]);
        assert_eq!(session.state(), SessionState::HasGraph);
    }

    #[test]
    fn test_upload_replaces_graph() {
        let dispatcher = Dispatcher::new();
        let mut session = Session::new();
        dispatcher.dispatch(&upload(&cycle6(), 1), &mut session);

        let heavier = Graph::from_edges(
            6,
            &[(0, 1, 5), (1, 2, 5), (2, 3, 5), (3, 4, 5), (4, 5, 5), (5, 0, 5)],
        );
        dispatcher.dispatch(&upload(&heavier, 2), &mut session);
        assert_eq!(session.graph(), Some(&heavier));
    }

    #[test]
    fn test_query_before_upload_is_not_ready() {
        let reply = Dispatcher::new().dispatch(&query(0, 3, 9), &mut Session::new());
        assert_eq!(reply.frame.command(), Command::Error);
        assert_eq!(reply.frame.status(), Status::NotReady);
        assert_eq!(reply.frame.request_id(), 9);
    }

    #[test]
    fn test_small_graph_rejected() {
        let dispatcher = Dispatcher::new();
        let mut session = Session::new();
        let small = Graph::from_edges(
            5,
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1), (4, 0, 1), (0, 2, 1)],
        );
        let reply = dispatcher.dispatch(&upload(&small, 1), &mut session);
        assert_eq!(reply.frame.command(), Command::Error);
        assert_eq!(reply.frame.status(), Status::InvalidRequest);
        assert!(decode_text(&reply.frame.payload).unwrap().contains("at least 6 vertices"));
        assert_eq!(session.state(), SessionState::NoGraph);
    }

    #[test]
    fn test_malformed_payloads() {
        let dispatcher = Dispatcher::new();
        let mut session = Session::new();

        let garbage = Frame::new(MessageHeader::request(Command::UploadGraph, 1), vec![0u8, 6]);
        let reply = dispatcher.dispatch(&garbage, &mut session);
        assert_eq!(reply.frame.status(), Status::InvalidRequest);
        assert_eq!(session.state(), SessionState::NoGraph);

        dispatcher.dispatch(&upload(&cycle6(), 2), &mut session);
        let short_query = Frame::new(MessageHeader::request(Command::PathQuery, 3), vec![0u8, 0, 1]);
        let reply = dispatcher.dispatch(&short_query, &mut session);
        assert_eq!(reply.frame.command(), Command::Error);
        assert_eq!(reply.frame.status(), Status::InvalidRequest);
        assert_eq!(session.state(), SessionState::HasGraph);
    }

    #[test]
    fn test_unreachable_and_out_of_range() {
        let dispatcher = Dispatcher::new();
        let mut session = Session::new();
        let island = Graph::from_edges(
            6,
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1), (4, 0, 1), (5, 5, 1)],
        );
        dispatcher.dispatch(&upload(&island, 1), &mut session);

        let reply = dispatcher.dispatch(&query(0, 5, 2), &mut session);
        assert_eq!(reply.frame.command(), Command::Error);
        assert_eq!(reply.frame.status(), Status::NotReady);

        let reply = dispatcher.dispatch(&query(0, 60, 3), &mut session);
        assert_eq!(reply.frame.status(), Status::InvalidRequest);
    }

    #[test]
    fn test_exit_and_unknown() {
        let dispatcher = Dispatcher::new();
        let mut session = Session::new();

        let reply = dispatcher.dispatch(&Frame::empty(MessageHeader::request(Command::Exit, 1)), &mut session);
        assert_eq!(reply.frame.command(), Command::Exit);
        assert_eq!(reply.frame.status(), Status::Ok);
        assert!(reply.close);

        for command in [Command::Unknown(99), Command::Ack, Command::PathResult] {
            let reply = dispatcher.dispatch(&Frame::empty(MessageHeader::request(command, 2)), &mut session);
            assert_eq!(reply.frame.command(), Command::Error);
            assert_eq!(reply.frame.status(), Status::InvalidRequest);
            assert_eq!(decode_text(&reply.frame.payload).unwrap(), "unknown command");
            assert!(!reply.close);
        }
    }

    #[test]
    fn test_unknown_request_status_rejected() {
        let dispatcher = Dispatcher::new();
        let mut session = Session::new();
        dispatcher.dispatch(&upload(&cycle6(), 1), &mut session);

        let mut header = MessageHeader::request(Command::Help, 77);
        header.status = Status::Unknown(9);
        let reply = dispatcher.dispatch(&Frame::empty(header), &mut session);
        assert_eq!(reply.frame.command(), Command::Error);
        assert_eq!(reply.frame.status(), Status::InvalidRequest);
        assert_eq!(reply.frame.request_id(), 77);
        assert_eq!(decode_text(&reply.frame.payload).unwrap(), "unknown status code 9");
        assert!(!reply.close);
        assert_eq!(session.state(), SessionState::HasGraph);
    }

    #[test]
    fn test_error_kind_status_mapping() {
        assert_eq!(ErrorKind::Decode.status(), Status::InvalidRequest);
        assert_eq!(ErrorKind::Unreachable.status(), Status::NotReady);
        assert_eq!(ErrorKind::Internal.status(), Status::InternalError);
        let e: DispatchError = GraphError::NoPath { from: 0, to: 1 }.into();
        assert_eq!(e.kind, ErrorKind::Unreachable);
    }
}
