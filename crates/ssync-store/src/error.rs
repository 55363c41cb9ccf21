//! Error types for the storage boundary.

use thiserror::Error;

/// Errors surfaced by storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A timestamp token that does not parse as `<seconds>.<5 digits>`.
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp {
        /// The offending token.
        value: String,
    },

    /// The backend failed in a way the protocol engine cannot classify.
    #[error("storage backend error: {msg}")]
    Backend {
        /// Backend-supplied description.
        msg: String,
    },
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
