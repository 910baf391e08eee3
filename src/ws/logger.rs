//! Fallback event logger
//!
//! A `WsHandler` that traces every event. Installed as the controller's
//! fallback handler, so it runs after the matched phases for every event.

use tracing::{debug, info, warn};

use super::{WsContext, WsHandler};

/// Build the tracing-backed fallback handler
pub fn event_logger() -> WsHandler {
    WsHandler::new()
        .on_connect(|ctx| {
            info!(
                session_id = %ctx.session_id(),
                path = ctx.request_path(),
                peer = ?ctx.connection().peer_addr(),
                "WebSocket connected"
            );
            Ok(())
        })
        .on_message(|ctx| {
            debug!(
                session_id = %ctx.session_id(),
                path = ctx.request_path(),
                len = ctx.message().len(),
                "WebSocket text message"
            );
            Ok(())
        })
        .on_binary_message(|ctx| {
            debug!(
                session_id = %ctx.session_id(),
                path = ctx.request_path(),
                offset = ctx.offset(),
                len = ctx.length(),
                "WebSocket binary message"
            );
            Ok(())
        })
        .on_close(|ctx| {
            info!(
                session_id = %ctx.session_id(),
                path = ctx.request_path(),
                status = ctx.status_code(),
                reason = ctx.reason().unwrap_or(""),
                "WebSocket closed"
            );
            Ok(())
        })
        .on_error(|ctx| {
            match ctx.error() {
                Some(err) => warn!(
                    session_id = %ctx.session_id(),
                    path = ctx.request_path(),
                    "WebSocket error: {}",
                    err
                ),
                None => warn!(
                    session_id = %ctx.session_id(),
                    path = ctx.request_path(),
                    "WebSocket error without cause"
                ),
            }
            Ok(())
        })
}
