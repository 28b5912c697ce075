//! Store error types.

use std::io;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not establish the store connection. Fatal to the subsystem.
    #[error("failed to connect to store at {path}: {source}")]
    Connect { path: String, source: io::Error },

    /// Transient I/O failure talking to the store.
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    /// The node or key does not exist. Expected during probing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The node already exists (duplicate watch registration and the like).
    #[error("already exists: {0}")]
    Exists(String),

    /// The store asked for a transaction retry.
    #[error("transaction retry requested")]
    Again,

    /// Any other errno reported by the store.
    #[error("store returned {errno} for {path}")]
    Errno { errno: String, path: String },

    /// Malformed frame or payload on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The handle was closed; no further events or replies will arrive.
    #[error("store handle closed")]
    Closed,
}

impl StoreError {
    /// Map an errno name from a wire `ERROR` reply to a typed error.
    pub fn from_errno(errno: &str, path: &str) -> Self {
        match errno {
            "ENOENT" => StoreError::NotFound(path.to_string()),
            "EEXIST" => StoreError::Exists(path.to_string()),
            "EAGAIN" => StoreError::Again,
            _ => StoreError::Errno {
                errno: errno.to_string(),
                path: path.to_string(),
            },
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
