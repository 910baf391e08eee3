//! Connection identity module
//!
//! Raw connection handles and the registry that assigns each live connection
//! its session identifier.

mod connection;
mod registry;

pub use connection::*;
pub use registry::*;
