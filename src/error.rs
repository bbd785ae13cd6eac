//! Error types for the diener gateway.
//!
//! A single [`DienerError`] covers every layer of the gateway, along with a
//! crate-wide [`Result`] alias. Request-scoped errors (`NotFound`, `Invalid`)
//! are returned to the HTTP layer verbatim; transport failures are logged
//! where they occur and collapsed to `NotFound` before they reach a client.

use thiserror::Error;

/// Main error type for gateway operations.
#[derive(Error, Debug)]
pub enum DienerError {
    /// The requested object or route does not exist. Rendered as 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// An unsupported file operation, e.g. a relative seek.
    #[error("invalid operation: {0}")]
    Invalid(String),

    /// Upstream object-storage or cluster-API failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request's context was cancelled while I/O was in flight.
    #[error("request cancelled")]
    Cancelled,

    /// Invalid or unusable configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DienerError {
    /// True for errors the HTTP layer renders as 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DienerError::NotFound(_))
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, DienerError>;
