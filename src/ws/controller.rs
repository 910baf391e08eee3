//! WebSocket dispatch controller
//!
//! Entry point for every socket event raised by the transport. For each event
//! the controller resolves the session identifier, builds the typed context and
//! runs three phases against the handlers matching the connection's path:
//!
//! 1. before-handlers then the endpoint handler, inside one failure boundary
//! 2. after-handlers, inside a second, independent failure boundary
//! 3. the fallback handler, outside any boundary
//!
//! The first failure in a boundary skips the rest of that phase and is handed
//! to the exception mapper together with the context.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use super::{
    Callback, DispatchError, DispatchResult, ExceptionMapper, HandlerEntry, HandlerError,
    HandlerResolver, WsBinaryMessageContext, WsCloseContext, WsConnectContext, WsContext,
    WsErrorContext, WsHandler, WsMessageContext,
};
use crate::session::{SessionRegistry, WsConnection};

/// Picks the callback for one event kind out of a handler bundle
type Selector<C> = fn(&WsHandler) -> Option<&Callback<C>>;

/// Strip the deployment context path from a request path
///
/// Returns `request_path` unchanged when it does not start with `context_path`.
pub fn normalize_path<'a>(context_path: &str, request_path: &'a str) -> &'a str {
    request_path
        .strip_prefix(context_path)
        .unwrap_or(request_path)
}

/// Dispatches socket events to the before, endpoint and after handlers that
/// match each connection's path
pub struct WsHandlerController {
    resolver: Arc<dyn HandlerResolver>,
    exception_mapper: Arc<dyn ExceptionMapper>,
    ws_logger: Option<WsHandler>,
    context_path: String,
    sessions: SessionRegistry,
}

/// Removes a connection's session once close handling is over, even if the
/// fallback handler unwinds
struct SessionRelease<'a> {
    sessions: &'a SessionRegistry,
    connection: &'a WsConnection,
}

impl Drop for SessionRelease<'_> {
    fn drop(&mut self) {
        self.sessions.remove(self.connection);
    }
}

impl WsHandlerController {
    pub fn new(
        resolver: Arc<dyn HandlerResolver>,
        exception_mapper: Arc<dyn ExceptionMapper>,
    ) -> Self {
        Self {
            resolver,
            exception_mapper,
            ws_logger: None,
            context_path: String::new(),
            sessions: SessionRegistry::new(),
        }
    }

    /// Set the fallback handler invoked after the matched phases
    pub fn with_logger(mut self, ws_logger: Option<WsHandler>) -> Self {
        self.ws_logger = ws_logger;
        self
    }

    /// Set the context path stripped from request paths before matching
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The key handlers are matched against for a request path
    pub fn matching_path<'a>(&self, request_path: &'a str) -> &'a str {
        normalize_path(&self.context_path, request_path)
    }

    /// Endpoint entry for a request path, used by the transport to refuse
    /// upgrades that no endpoint would serve
    pub fn resolve_endpoint(&self, request_path: &str) -> Option<&HandlerEntry> {
        self.resolver
            .find_endpoint_handler_entry(self.matching_path(request_path))
    }

    pub fn on_connect(&self, connection: &WsConnection) -> DispatchResult<()> {
        let session_id = self.sessions.register(connection);
        let ctx = WsConnectContext::new(session_id, connection.clone());
        self.dispatch(&ctx, WsHandler::connect_handler)
    }

    pub fn on_message(&self, connection: &WsConnection, message: String) -> DispatchResult<()> {
        let session_id = self.sessions.lookup(connection)?;
        let ctx = WsMessageContext::new(session_id, connection.clone(), message);
        self.dispatch(&ctx, WsHandler::message_handler)
    }

    pub fn on_binary_message(
        &self,
        connection: &WsConnection,
        data: Vec<u8>,
        offset: usize,
        length: usize,
    ) -> DispatchResult<()> {
        let session_id = self.sessions.lookup(connection)?;
        let ctx = WsBinaryMessageContext::new(session_id, connection.clone(), data, offset, length)?;
        self.dispatch(&ctx, WsHandler::binary_message_handler)
    }

    /// Dispatch the close event, then forget the connection's session
    pub fn on_close(
        &self,
        connection: &WsConnection,
        status_code: u16,
        reason: Option<String>,
    ) -> DispatchResult<()> {
        let session_id = self.sessions.lookup(connection)?;
        let _release = SessionRelease {
            sessions: &self.sessions,
            connection,
        };
        let ctx = WsCloseContext::new(session_id, connection.clone(), status_code, reason);
        self.dispatch(&ctx, WsHandler::close_handler)
    }

    pub fn on_error(
        &self,
        connection: &WsConnection,
        cause: Option<anyhow::Error>,
    ) -> DispatchResult<()> {
        let session_id = self.sessions.lookup(connection)?;
        let ctx = WsErrorContext::new(session_id, connection.clone(), cause);
        self.dispatch(&ctx, WsHandler::error_handler)
    }

    fn dispatch<C: WsContext>(&self, ctx: &C, select: Selector<C>) -> DispatchResult<()> {
        let path = self.matching_path(ctx.request_path());
        debug!(
            session_id = %ctx.session_id(),
            path,
            event = %ctx.as_event().kind(),
            "Dispatching WebSocket event"
        );

        self.try_before_and_endpoint_handlers(ctx, path, select)?;
        self.try_after_handlers(ctx, path, select);

        if let Some(callback) = self.ws_logger.as_ref().and_then(select) {
            callback(ctx).map_err(DispatchError::Fallback)?;
        }
        Ok(())
    }

    fn try_before_and_endpoint_handlers<C: WsContext>(
        &self,
        ctx: &C,
        path: &str,
        select: Selector<C>,
    ) -> DispatchResult<()> {
        let before = self
            .resolver
            .find_before_handler_entries(path)
            .into_iter()
            .try_for_each(|entry| invoke(entry, ctx, select));
        if let Err(err) = before {
            self.exception_mapper.handle(err, &ctx.as_event());
            return Ok(());
        }

        let Some(endpoint) = self.resolver.find_endpoint_handler_entry(path) else {
            error!(
                session_id = %ctx.session_id(),
                path,
                "No endpoint handler for a connected WebSocket path"
            );
            return Err(DispatchError::MissingEndpointHandler(path.to_string()));
        };

        if let Err(err) = invoke(endpoint, ctx, select) {
            self.exception_mapper.handle(err, &ctx.as_event());
        }
        Ok(())
    }

    fn try_after_handlers<C: WsContext>(&self, ctx: &C, path: &str, select: Selector<C>) {
        let after = self
            .resolver
            .find_after_handler_entries(path)
            .into_iter()
            .try_for_each(|entry| invoke(entry, ctx, select));
        if let Err(err) = after {
            self.exception_mapper.handle(err, &ctx.as_event());
        }
    }
}

/// Run an entry's callback for this event kind, converting panics to errors
fn invoke<C>(entry: &HandlerEntry, ctx: &C, select: Selector<C>) -> Result<(), HandlerError> {
    let Some(callback) = select(entry.handler()) else {
        return Ok(());
    };

    match panic::catch_unwind(AssertUnwindSafe(|| callback(ctx))) {
        Ok(result) => result.map_err(HandlerError::Failed),
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
