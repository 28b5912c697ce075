//! Probe error types.

use thiserror::Error;
use xenbus_store::StoreError;

/// Errors that can occur while probing backend nodes.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The node path does not have the `root/type/frontend/id` shape.
    #[error("malformed node path: {0}")]
    MalformedPath(String),

    /// The formatted bus id would not fit its fixed capacity.
    #[error("bus id {0} does not fit")]
    Overflow(String),

    /// A required backend key is absent.
    #[error("{nodename}: missing {key}")]
    MissingField {
        nodename: String,
        key: &'static str,
    },

    /// A required backend key is present but unusable.
    #[error("{nodename}: invalid {key}: {value}")]
    InvalidField {
        nodename: String,
        key: &'static str,
        value: String,
    },

    /// The backend's frontend pointer is present but empty.
    #[error("{nodename}: empty frontend reference")]
    EmptyReference { nodename: String },

    /// The backend references a frontend that is not in the store.
    #[error("{nodename}: frontend {frontend} is gone")]
    DanglingReference { nodename: String, frontend: String },

    /// The external device model refused the registration.
    #[error("device registration failed: {0}")]
    Registration(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProbeError {
    /// Data-consistency errors on one node are expected during races and
    /// logged at diagnostic level; everything else is a real failure.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            ProbeError::MissingField { .. }
                | ProbeError::InvalidField { .. }
                | ProbeError::EmptyReference { .. }
                | ProbeError::DanglingReference { .. }
        )
    }
}

/// Result type for probe operations.
pub type Result<T> = std::result::Result<T, ProbeError>;
