//! WebSocket event dispatch
//!
//! Routes socket lifecycle events (connect, text, binary, close, error) to
//! path-matched before, endpoint and after handlers, isolating handler
//! failures per phase and funneling them to an exception mapper.

pub mod config;
pub mod routes;
pub mod server;
pub mod session;
pub mod ws;
