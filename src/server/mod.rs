//! WebSocket server module
//!
//! Accepts connections and drives the dispatch controller with their
//! lifecycle events.

mod websocket;

pub use websocket::*;
