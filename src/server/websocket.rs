//! WebSocket server implementation
//!
//! Accepts TCP connections, performs the WebSocket upgrade and turns each
//! connection's frame stream into dispatch controller events.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::session::WsConnection;
use crate::ws::{DispatchError, DispatchResult, WsHandlerController};

/// Close status reported when the peer's close frame carried no code
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Close status reported when the stream ended without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close status sent to peers on server shutdown
pub const GOING_AWAY: u16 = 1001;
/// Close status sent when dispatch for a connection cannot continue
pub const INTERNAL_ERROR: u16 = 1011;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket server feeding a dispatch controller
pub struct WebSocketServer {
    config: ServerConfig,
    controller: Arc<WsHandlerController>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig, controller: Arc<WsHandlerController>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            controller,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver (for external components to listen for shutdown)
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(
            "WebSocket server listening on ws://{}{}",
            addr, self.config.context_path
        );
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let controller = Arc::clone(&self.controller);
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, controller, shutdown_rx).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let session_count = self.controller.sessions().len();
        if session_count > 0 {
            info!("Waiting for {} active sessions to close...", session_count);
        }

        Ok(())
    }
}

/// What the upgrade callback learned about the request
struct UpgradeTarget {
    request_uri: String,
    path_params: HashMap<String, String>,
}

/// Socket events in the form the controller consumes them
enum TransportEvent {
    Connect,
    Message(String),
    Binary(Vec<u8>),
    Close(u16, Option<String>),
    Error(anyhow::Error),
}

impl TransportEvent {
    fn dispatch(
        self,
        controller: &WsHandlerController,
        connection: &WsConnection,
    ) -> DispatchResult<()> {
        match self {
            Self::Connect => controller.on_connect(connection),
            Self::Message(text) => controller.on_message(connection, text),
            Self::Binary(data) => {
                let length = data.len();
                controller.on_binary_message(connection, data, 0, length)
            }
            Self::Close(status_code, reason) => controller.on_close(connection, status_code, reason),
            Self::Error(cause) => controller.on_error(connection, Some(cause)),
        }
    }
}

/// Refuse upgrades that no endpoint would serve
fn accept_upgrade(
    controller: &WsHandlerController,
    request: &Request,
) -> Result<UpgradeTarget, ErrorResponse> {
    let path = request.uri().path();
    let Some(endpoint) = controller.resolve_endpoint(path) else {
        debug!("No WebSocket endpoint for {}", path);
        let mut response = ErrorResponse::new(Some("Not Found".to_string()));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Err(response);
    };

    let path_params = endpoint
        .pattern()
        .captures(controller.matching_path(path))
        .unwrap_or_default();
    let request_uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.to_string());

    Ok(UpgradeTarget {
        request_uri,
        path_params,
    })
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    controller: Arc<WsHandlerController>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    debug!("New connection from {}", peer_addr);

    // Upgrade to WebSocket
    let mut target = None;
    let upgrade = accept_hdr_async(stream, |request: &Request, response: Response| {
        target = Some(accept_upgrade(&controller, request)?);
        Ok(response)
    })
    .await;
    let ws_stream = match upgrade {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!("Rejected upgrade from {}: {}", peer_addr, e);
            return Ok(());
        }
    };
    let Some(target) = target else {
        anyhow::bail!("Upgrade from {} accepted without a target", peer_addr);
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Forward queued frames to the socket
    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = ws_sender.send(message).await {
                debug!("Writer for {} stopped: {}", peer_addr, e);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let connection = WsConnection::new(&target.request_uri, tx)
        .with_peer_addr(peer_addr)
        .with_path_params(target.path_params);

    let (status_code, reason) = 'events: {
        if !deliver(&controller, &connection, TransportEvent::Connect).await {
            break 'events abort(&connection);
        }

        loop {
            tokio::select! {
                // Receive frames from the client
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !deliver(&controller, &connection, TransportEvent::Message(text)).await {
                                break 'events abort(&connection);
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if !deliver(&controller, &connection, TransportEvent::Binary(data)).await {
                                break 'events abort(&connection);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = connection.send_frame(Message::Pong(data));
                        }
                        Some(Ok(Message::Pong(_))) => {
                            // Ignore pong messages
                        }
                        Some(Ok(Message::Frame(_))) => {
                            // Raw frame, ignore
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!("Client {} requested close", peer_addr);
                            break 'events close_status(frame);
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error from {}: {}", peer_addr, e);
                            deliver(&controller, &connection, TransportEvent::Error(e.into())).await;
                            break 'events (ABNORMAL_CLOSURE, None);
                        }
                        None => {
                            debug!("Connection closed by {}", peer_addr);
                            break 'events (ABNORMAL_CLOSURE, None);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection to {}", peer_addr);
                    let reason = "Server shutting down";
                    let _ = connection.close(GOING_AWAY, reason);
                    break 'events (GOING_AWAY, Some(reason.to_string()));
                }
            }
        }
    };

    deliver(
        &controller,
        &connection,
        TransportEvent::Close(status_code, reason),
    )
    .await;

    // Let the writer flush what handlers queued, including close replies
    drop(connection);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!("Writer for {} did not drain in time", peer_addr);
        writer.abort();
    }

    debug!("Connection from {} closed with status {}", peer_addr, status_code);
    Ok(())
}

/// Run one event through the controller on the blocking pool
///
/// Returns `false` when the connection cannot continue.
async fn deliver(
    controller: &Arc<WsHandlerController>,
    connection: &WsConnection,
    event: TransportEvent,
) -> bool {
    let task_controller = Arc::clone(controller);
    let task_connection = connection.clone();
    let result =
        tokio::task::spawn_blocking(move || event.dispatch(&task_controller, &task_connection))
            .await;

    match result {
        Ok(Ok(())) => true,
        Ok(Err(
            e @ (DispatchError::UnknownConnection(_) | DispatchError::MissingEndpointHandler(_)),
        )) => {
            error!(connection = %connection.id(), "Dispatch aborted: {}", e);
            false
        }
        Ok(Err(e)) => {
            error!(connection = %connection.id(), "Dispatch failed: {}", e);
            true
        }
        Err(e) => {
            error!(connection = %connection.id(), "Dispatch task failed: {}", e);
            false
        }
    }
}

fn abort(connection: &WsConnection) -> (u16, Option<String>) {
    let reason = "Internal error";
    let _ = connection.close(INTERNAL_ERROR, reason);
    (INTERNAL_ERROR, Some(reason.to_string()))
}

fn close_status(frame: Option<CloseFrame<'_>>) -> (u16, Option<String>) {
    match frame {
        Some(frame) => {
            let reason = Some(frame.reason.to_string()).filter(|r| !r.is_empty());
            (u16::from(frame.code), reason)
        }
        None => (NO_STATUS_RECEIVED, None),
    }
}
