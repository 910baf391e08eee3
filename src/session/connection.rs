//! Raw WebSocket connection handle
//!
//! A `WsConnection` is what the transport hands to the dispatch controller for
//! every event. It carries the upgrade request details and an outbound frame
//! queue drained by the transport's writer task.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::form_urlencoded;

/// Sender half of a connection's outbound frame queue
pub type FrameSender = mpsc::UnboundedSender<Message>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Errors that can occur when queueing outbound frames
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("Connection is closed")]
    Closed,
}

/// Stable identity of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next process-wide connection id
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle to a live WebSocket connection
///
/// Cloning is cheap. Equality and hashing go through the connection id only.
#[derive(Debug, Clone)]
pub struct WsConnection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    request_path: Arc<str>,
    query: Option<Arc<str>>,
    query_params: Arc<Vec<(String, String)>>,
    path_params: Arc<HashMap<String, String>>,
    tx: FrameSender,
}

impl WsConnection {
    /// Create a handle for an upgrade request URI such as `/chat/1?name=bob`
    pub fn new(request_uri: &str, tx: FrameSender) -> Self {
        let (path, query) = match request_uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (request_uri, None),
        };
        let query_params: Vec<(String, String)> = query
            .map(|query| form_urlencoded::parse(query.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Self {
            id: ConnectionId::next(),
            peer_addr: None,
            request_path: Arc::from(path),
            query: query.map(Arc::from),
            query_params: Arc::new(query_params),
            path_params: Arc::new(HashMap::new()),
            tx,
        }
    }

    /// Set the remote peer address
    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    /// Set the path parameters captured by the endpoint pattern at upgrade time
    pub fn with_path_params(mut self, params: HashMap<String, String>) -> Self {
        self.path_params = Arc::new(params);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Full request path of the upgrade request, context path included
    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    /// Raw query string of the upgrade request, without the leading `?`
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// All decoded query parameters in request order
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query_params
    }

    /// First decoded value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// Queue a text frame
    pub fn send(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send_frame(Message::Text(text.into()))
    }

    /// Queue a binary frame
    pub fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), SendError> {
        self.send_frame(Message::Binary(data.into()))
    }

    /// Queue a close frame; the writer stops after sending it
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), SendError> {
        let reason: String = reason.into();
        self.send_frame(Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })))
    }

    pub(crate) fn send_frame(&self, message: Message) -> Result<(), SendError> {
        self.tx.send(message).map_err(|_| SendError::Closed)
    }

    /// Whether the transport writer is still accepting frames
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl PartialEq for WsConnection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WsConnection {}

impl Hash for WsConnection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(uri: &str) -> (WsConnection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WsConnection::new(uri, tx), rx)
    }

    #[test]
    fn test_splits_path_and_query() {
        let (conn, _rx) = connection("/chat/1?name=bob&room=a%20b");
        assert_eq!(conn.request_path(), "/chat/1");
        assert_eq!(conn.query(), Some("name=bob&room=a%20b"));
        assert_eq!(conn.query_param("name"), Some("bob"));
        assert_eq!(conn.query_param("room"), Some("a b"));
        assert_eq!(conn.query_param("missing"), None);
    }

    #[test]
    fn test_query_decoding_edge_cases() {
        let (conn, _rx) = connection("/x?a=1+2&flag&&bad=%zz&tail=%4");
        let params = conn.query_params();
        assert_eq!(params.len(), 4);
        assert_eq!(params[0], ("a".to_string(), "1 2".to_string()));
        assert_eq!(params[1], ("flag".to_string(), String::new()));
        assert_eq!(params[2], ("bad".to_string(), "%zz".to_string()));
        assert_eq!(params[3], ("tail".to_string(), "%4".to_string()));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _ra) = connection("/a");
        let (b, _rb) = connection("/a");
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_send_and_close_queue_frames() {
        let (conn, mut rx) = connection("/echo");
        conn.send("hello").unwrap();
        conn.send_binary(vec![1u8, 2, 3]).unwrap();
        conn.close(1011, "Server Error").unwrap();

        assert_eq!(rx.try_recv().unwrap(), Message::Text("hello".to_string()));
        assert_eq!(rx.try_recv().unwrap(), Message::Binary(vec![1, 2, 3]));
        match rx.try_recv().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1011);
                assert_eq!(frame.reason, "Server Error");
            }
            other => panic!("Expected close frame, got {:?}", other),
        }
    }

    #[test]
    fn test_send_after_writer_dropped() {
        let (conn, rx) = connection("/echo");
        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(conn.send("late"), Err(SendError::Closed));
    }
}
