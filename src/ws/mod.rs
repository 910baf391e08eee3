//! WebSocket event dispatch module
//!
//! Typed event contexts, handler entries, path resolution, exception mapping
//! and the controller that ties them together for every socket event.

mod context;
mod controller;
mod error;
mod exception;
mod handler;
mod logger;
mod matcher;

pub use context::*;
pub use controller::*;
pub use error::*;
pub use exception::*;
pub use handler::*;
pub use logger::*;
pub use matcher::*;
