//! Dispatch and handler error types

use thiserror::Error;

use crate::session::ConnectionId;

/// Result type returned by handler callbacks
pub type HandlerResult = anyhow::Result<()>;

/// Errors that escape a controller entry point
///
/// Handler failures never appear here; they are funneled to the exception
/// mapper at the phase boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown connection {0}: event delivered outside its connect/close window")]
    UnknownConnection(ConnectionId),

    #[error("No endpoint handler matches path: {0}")]
    MissingEndpointHandler(String),

    #[error("Binary payload range out of bounds: offset {offset} + length {length} exceeds {len} bytes")]
    InvalidPayloadRange {
        offset: usize,
        length: usize,
        len: usize,
    },

    #[error("Fallback handler failed: {0}")]
    Fallback(anyhow::Error),
}

/// Result type for controller operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// A failure raised by a before, endpoint or after handler callback
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(#[from] anyhow::Error),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Downcast a returned error to a concrete type; panics never match
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            Self::Failed(err) => err.downcast_ref::<E>(),
            Self::Panicked(_) => None,
        }
    }
}
