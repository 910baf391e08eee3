//! ws-dispatch server
//!
//! Serves the built-in echo and room endpoints through the WebSocket dispatch
//! controller.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ws_dispatch::config::{AppConfig, CONFIG_FILE};
use ws_dispatch::routes::{self, RoomHub};
use ws_dispatch::server::WebSocketServer;
use ws_dispatch::ws::{event_logger, HandlerType, WsHandlerController};

/// ws-dispatch server
///
/// WebSocket event dispatch with before/endpoint/after handler phases
#[derive(Parser, Debug)]
#[command(name = "ws-dispatch")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Context path stripped from request paths (overrides the config file)
    #[arg(long)]
    context_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Do not install the per-event logger
    #[arg(long)]
    no_event_log: bool,
}

impl Args {
    /// Apply command line overrides on top of the file configuration
    fn apply(self, mut config: AppConfig) -> AppConfig {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(context_path) = self.context_path {
            config.server.context_path = context_path;
        }
        if self.verbose {
            config.logging.verbose = true;
        }
        if self.no_event_log {
            config.logging.log_events = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;
    let config = args.apply(config);

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if config.logging.verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("ws-dispatch v{}", env!("CARGO_PKG_VERSION"));

    if !config.server.context_path.is_empty() {
        info!("Context path: {}", config.server.context_path);
    }

    let hub = Arc::new(RoomHub::new());
    let matcher = routes::build_matcher(hub);
    let exception_mapper = routes::exception_mapper();
    info!(
        endpoints = matcher.entry_count(HandlerType::Endpoint),
        before = matcher.entry_count(HandlerType::Before),
        after = matcher.entry_count(HandlerType::After),
        mapped_errors = exception_mapper.callback_count(),
        "Registered WebSocket handlers"
    );
    if matcher.entry_count(HandlerType::Endpoint) == 0 {
        warn!("No WebSocket endpoints registered; every upgrade will be refused");
    }

    let logger = config.logging.log_events.then(event_logger);
    let controller = WsHandlerController::new(Arc::new(matcher), Arc::new(exception_mapper))
        .with_context_path(config.server.context_path.clone())
        .with_logger(logger);

    // Create and start the WebSocket server
    let server = Arc::new(WebSocketServer::new(config.server, Arc::new(controller)));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "ws-dispatch",
            "--port",
            "9100",
            "--context-path",
            "/api",
            "--no-event-log",
        ]);
        assert_eq!(args.config, PathBuf::from(CONFIG_FILE));

        let config = args.apply(AppConfig::default());
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.context_path, "/api");
        assert!(!config.logging.log_events);
        assert!(!config.logging.verbose);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let mut file_config = AppConfig::default();
        file_config.server.port = 7000;
        file_config.logging.verbose = true;

        let config = Args::parse_from(["ws-dispatch"]).apply(file_config.clone());
        assert_eq!(config, file_config);
    }
}
