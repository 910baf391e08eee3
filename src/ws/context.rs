//! Event contexts
//!
//! One immutable context type per socket event kind. A context is built fresh
//! for every event and handed by reference to each handler callback.

use std::fmt;
use std::sync::Arc;

use crate::session::{SendError, SessionId, WsConnection};

use super::{DispatchError, DispatchResult};

/// Kind of socket event being dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsEventKind {
    Connect,
    Message,
    BinaryMessage,
    Close,
    Error,
}

impl WsEventKind {
    pub const ALL: [WsEventKind; 5] = [
        Self::Connect,
        Self::Message,
        Self::BinaryMessage,
        Self::Close,
        Self::Error,
    ];
}

impl fmt::Display for WsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Message => "message",
            Self::BinaryMessage => "binary_message",
            Self::Close => "close",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Accessors shared by every event context
pub trait WsContext {
    fn session_id(&self) -> SessionId;

    fn connection(&self) -> &WsConnection;

    /// Borrow this context as the event-kind-erased view
    fn as_event(&self) -> WsEventContext<'_>;

    fn request_path(&self) -> &str {
        self.connection().request_path()
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.connection().query_param(name)
    }

    fn path_param(&self, name: &str) -> Option<&str> {
        self.connection().path_param(name)
    }

    fn send(&self, text: impl Into<String>) -> Result<(), SendError>
    where
        Self: Sized,
    {
        self.connection().send(text)
    }

    fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<(), SendError>
    where
        Self: Sized,
    {
        self.connection().send_binary(data)
    }

    fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), SendError>
    where
        Self: Sized,
    {
        self.connection().close(code, reason)
    }
}

macro_rules! impl_ws_context {
    ($ty:ty, $variant:ident) => {
        impl WsContext for $ty {
            fn session_id(&self) -> SessionId {
                self.session_id
            }

            fn connection(&self) -> &WsConnection {
                &self.connection
            }

            fn as_event(&self) -> WsEventContext<'_> {
                WsEventContext::$variant(self)
            }
        }
    };
}

/// Context for a newly opened connection
#[derive(Debug, Clone)]
pub struct WsConnectContext {
    session_id: SessionId,
    connection: WsConnection,
}

impl WsConnectContext {
    pub fn new(session_id: SessionId, connection: WsConnection) -> Self {
        Self {
            session_id,
            connection,
        }
    }
}

/// Context for a text message
#[derive(Debug, Clone)]
pub struct WsMessageContext {
    session_id: SessionId,
    connection: WsConnection,
    message: String,
}

impl WsMessageContext {
    pub fn new(session_id: SessionId, connection: WsConnection, message: String) -> Self {
        Self {
            session_id,
            connection,
            message,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Context for a binary message
///
/// Holds the transport's buffer as delivered, plus the offset/length view
/// that delimits the payload within it.
#[derive(Debug, Clone)]
pub struct WsBinaryMessageContext {
    session_id: SessionId,
    connection: WsConnection,
    data: Vec<u8>,
    offset: usize,
    length: usize,
}

impl WsBinaryMessageContext {
    /// Build the context, rejecting views that fall outside the buffer
    pub fn new(
        session_id: SessionId,
        connection: WsConnection,
        data: Vec<u8>,
        offset: usize,
        length: usize,
    ) -> DispatchResult<Self> {
        let in_bounds = offset
            .checked_add(length)
            .is_some_and(|end| end <= data.len());
        if !in_bounds {
            return Err(DispatchError::InvalidPayloadRange {
                offset,
                length,
                len: data.len(),
            });
        }

        Ok(Self {
            session_id,
            connection,
            data,
            offset,
            length,
        })
    }

    /// The `[offset, offset + length)` view of the buffer
    pub fn payload(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    /// The whole buffer as delivered by the transport
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

/// Context for a closed connection
#[derive(Debug, Clone)]
pub struct WsCloseContext {
    session_id: SessionId,
    connection: WsConnection,
    status_code: u16,
    reason: Option<String>,
}

impl WsCloseContext {
    pub fn new(
        session_id: SessionId,
        connection: WsConnection,
        status_code: u16,
        reason: Option<String>,
    ) -> Self {
        Self {
            session_id,
            connection,
            status_code,
            reason,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Context for a transport-level error
#[derive(Debug, Clone)]
pub struct WsErrorContext {
    session_id: SessionId,
    connection: WsConnection,
    error: Option<Arc<anyhow::Error>>,
}

impl WsErrorContext {
    pub fn new(session_id: SessionId, connection: WsConnection, error: Option<anyhow::Error>) -> Self {
        Self {
            session_id,
            connection,
            error: error.map(Arc::new),
        }
    }

    /// The cause reported by the transport, if any
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_deref()
    }
}

impl_ws_context!(WsConnectContext, Connect);
impl_ws_context!(WsMessageContext, Message);
impl_ws_context!(WsBinaryMessageContext, BinaryMessage);
impl_ws_context!(WsCloseContext, Close);
impl_ws_context!(WsErrorContext, Error);

/// Borrowed view over any event context
#[derive(Debug, Clone, Copy)]
pub enum WsEventContext<'a> {
    Connect(&'a WsConnectContext),
    Message(&'a WsMessageContext),
    BinaryMessage(&'a WsBinaryMessageContext),
    Close(&'a WsCloseContext),
    Error(&'a WsErrorContext),
}

impl WsEventContext<'_> {
    pub fn kind(&self) -> WsEventKind {
        match self {
            Self::Connect(_) => WsEventKind::Connect,
            Self::Message(_) => WsEventKind::Message,
            Self::BinaryMessage(_) => WsEventKind::BinaryMessage,
            Self::Close(_) => WsEventKind::Close,
            Self::Error(_) => WsEventKind::Error,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Connect(ctx) => ctx.session_id(),
            Self::Message(ctx) => ctx.session_id(),
            Self::BinaryMessage(ctx) => ctx.session_id(),
            Self::Close(ctx) => ctx.session_id(),
            Self::Error(ctx) => ctx.session_id(),
        }
    }

    pub fn connection(&self) -> &WsConnection {
        match self {
            Self::Connect(ctx) => ctx.connection(),
            Self::Message(ctx) => ctx.connection(),
            Self::BinaryMessage(ctx) => ctx.connection(),
            Self::Close(ctx) => ctx.connection(),
            Self::Error(ctx) => ctx.connection(),
        }
    }
}
