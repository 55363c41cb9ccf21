//! Error types for the wire layer.

use thiserror::Error;

/// Errors that can occur reading from or writing to a line channel.
#[derive(Debug, Error)]
pub enum WireError {
    /// A bounded read did not complete within the configured client timeout.
    #[error("{seconds} seconds: {label}")]
    Timeout {
        /// Configured timeout that expired, in seconds.
        seconds: f64,
        /// Which read timed out (e.g. "missing_check line").
        label: &'static str,
    },

    /// The peer closed the stream in the middle of a declared-length read.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// A line exceeded the channel's maximum line length.
    #[error("line exceeds {limit} bytes")]
    LineTooLong {
        /// Maximum accepted line length.
        limit: usize,
    },

    /// A line was not valid UTF-8.
    #[error("line is not valid UTF-8")]
    NotUtf8,

    /// Underlying stream error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
