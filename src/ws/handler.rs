//! Handler bundles and entries
//!
//! A `WsHandler` holds one optional callback per event kind. A `HandlerEntry`
//! binds a handler to the path pattern it was registered under.

use std::fmt;
use std::sync::Arc;

use super::{
    HandlerResult, PathPattern, WsBinaryMessageContext, WsCloseContext, WsConnectContext,
    WsErrorContext, WsEventKind, WsMessageContext,
};

/// A handler callback for context type `C`
pub type Callback<C> = Arc<dyn Fn(&C) -> HandlerResult + Send + Sync>;

/// Resolution tier a handler entry was registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerType {
    Before,
    Endpoint,
    After,
}

/// Bundle of optional per-event-kind callbacks
#[derive(Clone, Default)]
pub struct WsHandler {
    connect: Option<Callback<WsConnectContext>>,
    message: Option<Callback<WsMessageContext>>,
    binary_message: Option<Callback<WsBinaryMessageContext>>,
    close: Option<Callback<WsCloseContext>>,
    error: Option<Callback<WsErrorContext>>,
}

impl WsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&WsConnectContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.connect = Some(Arc::new(callback));
        self
    }

    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&WsMessageContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.message = Some(Arc::new(callback));
        self
    }

    pub fn on_binary_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&WsBinaryMessageContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.binary_message = Some(Arc::new(callback));
        self
    }

    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(&WsCloseContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.close = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&WsErrorContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(callback));
        self
    }

    pub fn connect_handler(&self) -> Option<&Callback<WsConnectContext>> {
        self.connect.as_ref()
    }

    pub fn message_handler(&self) -> Option<&Callback<WsMessageContext>> {
        self.message.as_ref()
    }

    pub fn binary_message_handler(&self) -> Option<&Callback<WsBinaryMessageContext>> {
        self.binary_message.as_ref()
    }

    pub fn close_handler(&self) -> Option<&Callback<WsCloseContext>> {
        self.close.as_ref()
    }

    pub fn error_handler(&self) -> Option<&Callback<WsErrorContext>> {
        self.error.as_ref()
    }

    /// Whether a callback is defined for the given event kind
    pub fn handles(&self, kind: WsEventKind) -> bool {
        match kind {
            WsEventKind::Connect => self.connect.is_some(),
            WsEventKind::Message => self.message.is_some(),
            WsEventKind::BinaryMessage => self.binary_message.is_some(),
            WsEventKind::Close => self.close.is_some(),
            WsEventKind::Error => self.error.is_some(),
        }
    }

    /// Whether no callback is defined at all
    pub fn is_empty(&self) -> bool {
        !WsEventKind::ALL.iter().any(|kind| self.handles(*kind))
    }
}

impl fmt::Debug for WsHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsHandler")
            .field("connect", &self.connect.is_some())
            .field("message", &self.message.is_some())
            .field("binary_message", &self.binary_message.is_some())
            .field("close", &self.close.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// A handler registered under a path pattern
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    pattern: PathPattern,
    handler: WsHandler,
}

impl HandlerEntry {
    pub fn new(path: &str, handler: WsHandler) -> Self {
        Self {
            pattern: PathPattern::parse(path),
            handler,
        }
    }

    /// The pattern as registered
    pub fn path(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn handler(&self) -> &WsHandler {
        &self.handler
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }
}
