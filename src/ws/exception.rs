//! Exception mapping
//!
//! Turns a handler failure caught at a phase boundary into a terminal action.

use tracing::{debug, error};

use super::{HandlerError, WsEventContext};

/// Close status sent when no typed callback claims a failure
pub const SERVER_ERROR_STATUS: u16 = 1011;

/// Receives every handler failure caught by the dispatch controller
pub trait ExceptionMapper: Send + Sync {
    fn handle(&self, error: HandlerError, ctx: &WsEventContext<'_>);
}

type TypedCallback = Box<dyn Fn(&HandlerError, &WsEventContext<'_>) -> bool + Send + Sync>;

/// Exception mapper with per-error-type callbacks
///
/// Callbacks are tried in registration order and the first one whose type
/// matches wins. Unclaimed failures are logged and the connection is closed
/// with status 1011.
#[derive(Default)]
pub struct WsExceptionMapper {
    callbacks: Vec<TypedCallback>,
}

impl WsExceptionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for failures whose error is of type `E`
    pub fn on<E, F>(mut self, callback: F) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&E, &WsEventContext<'_>) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(
            move |err: &HandlerError, ctx: &WsEventContext<'_>| match err.downcast_ref::<E>() {
                Some(typed) => {
                    callback(typed, ctx);
                    true
                }
                None => false,
            },
        ));
        self
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    fn handle_uncaught(&self, err: &HandlerError, ctx: &WsEventContext<'_>) {
        let connection = ctx.connection();
        error!(
            session_id = %ctx.session_id(),
            path = connection.request_path(),
            event = %ctx.kind(),
            "Uncaught exception in WebSocket handler: {}",
            err
        );

        if let Err(e) = connection.close(SERVER_ERROR_STATUS, "Server Error") {
            debug!(connection = %connection.id(), "Could not close connection: {}", e);
        }
    }
}

impl ExceptionMapper for WsExceptionMapper {
    fn handle(&self, error: HandlerError, ctx: &WsEventContext<'_>) {
        if self.callbacks.iter().any(|callback| callback(&error, ctx)) {
            return;
        }
        self.handle_uncaught(&error, ctx);
    }
}
