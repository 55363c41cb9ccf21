//! The session error taxonomy.
//!
//! Negotiation failures surface as an outer non-200 status before any phase
//! runs; everything after negotiation is reported in-band as a single
//! `:ERROR:` line rendered from [`SyncError`] in one place.

use thiserror::Error;

use ssync_store::StoreError;
use ssync_wire::{ErrorLine, SubrequestError, SubrequestFault, WireError};

/// Failures detected while validating the inbound session request, before
/// any locking or phase I/O.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// Path did not resolve to exactly `/<device>/<partition>`.
    #[error("Invalid path: {path}")]
    InvalidPath {
        /// Path as received.
        path: String,
    },

    /// The node-wide session permit pool is exhausted.
    #[error("Service Unavailable")]
    Busy,

    /// The policy index does not name a configured policy.
    #[error("No policy with index {index}")]
    UnknownPolicy {
        /// The offending index.
        index: u32,
    },

    /// Fragment and node index were both supplied but differ.
    #[error("Frag-Index ({frag}) != Node-Index ({node})")]
    IndexMismatch {
        /// Fragment index, or `None`.
        frag: String,
        /// Node index, or `None`.
        node: String,
    },

    /// A session header that must be an integer was not.
    #[error("invalid {header} header {value:?}")]
    BadHeader {
        /// Header name.
        header: String,
        /// Value as received.
        value: String,
    },

    /// The addressed device is not mounted or usable.
    #[error("{device} is not mounted")]
    DeviceUnavailable {
        /// Device name.
        device: String,
    },
}

impl NegotiationError {
    /// Outer response status for this failure.
    pub fn status(&self) -> u16 {
        match self {
            NegotiationError::InvalidPath { .. }
            | NegotiationError::IndexMismatch { .. }
            | NegotiationError::BadHeader { .. } => 400,
            NegotiationError::Busy | NegotiationError::UnknownPolicy { .. } => 503,
            NegotiationError::DeviceUnavailable { .. } => 507,
        }
    }
}

/// Everything that can abort a session after negotiation. One value, one
/// rendering point: [`SyncError::to_error_line`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// A bounded read expired mid-phase.
    #[error("{seconds} seconds: {label}")]
    Timeout {
        /// Timeout that expired, in seconds.
        seconds: f64,
        /// Which read timed out.
        label: String,
    },

    /// The per-device replication lock could not be acquired in time. An
    /// expected contention outcome, reported at low severity.
    #[error("{seconds} seconds: {path}")]
    LockTimeout {
        /// Bounded wait that expired, in seconds.
        seconds: f64,
        /// Lock path that was contended.
        path: String,
    },

    /// The peer violated the wire grammar.
    #[error("{msg}")]
    Protocol {
        /// The specific violated rule.
        msg: String,
    },

    /// A DELETE subrequest declared a body.
    #[error("DELETE subrequest with content-length {path}")]
    DeleteWithContentLength {
        /// Subrequest path as sent.
        path: String,
    },

    /// A PUT subrequest declared no body length.
    #[error("No content-length sent for PUT {path}")]
    NoContentLength {
        /// Subrequest path as sent.
        path: String,
    },

    /// The stream ended before a declared body length was satisfied.
    #[error("Early termination for {method} {path}")]
    EarlyTermination {
        /// Subrequest method as sent.
        method: String,
        /// Subrequest path as sent.
        path: String,
    },

    /// A subrequest verb outside the allowed set, reported only after its
    /// declared body was drained.
    #[error("Invalid subrequest method {method}")]
    InvalidMethod {
        /// The offending verb.
        method: String,
    },

    /// Hard circuit-breaker trip mid-stream.
    #[error("Too many {failures} failures to {successes} successes")]
    TooManyFailures {
        /// Failed subrequests so far.
        failures: u64,
        /// Succeeded subrequests so far.
        successes: u64,
    },

    /// The update phase finished with failures short of the trip point.
    #[error("ERROR: With :UPDATES: {failures} failures to {successes} successes")]
    UpdateFailures {
        /// Failed subrequests in the phase.
        failures: u64,
        /// Succeeded subrequests in the phase.
        successes: u64,
    },

    /// The storage collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The peer reported an in-band error (sender side).
    #[error("remote error {status}: {message}")]
    Remote {
        /// Status from the peer's error line.
        status: u16,
        /// Message from the peer's error line.
        message: String,
    },

    /// The stream closed where a reply line was expected (sender side).
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// Underlying stream failure.
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl SyncError {
    /// In-band status: 408 for read timeouts, 500 for the soft end-of-phase
    /// tally, 0 for everything detected locally without a natural status.
    pub fn status(&self) -> u16 {
        match self {
            SyncError::Timeout { .. } => 408,
            SyncError::UpdateFailures { .. } => 500,
            SyncError::Remote { status, .. } => *status,
            _ => 0,
        }
    }

    /// Render as the in-band error line that replaces the remainder of the
    /// phase output.
    pub fn to_error_line(&self) -> ErrorLine {
        ErrorLine::new(self.status(), self.to_string())
    }

    /// Whether this failure warrants force-closing the connection rather
    /// than normal teardown. Lock contention and the soft tally are expected
    /// outcomes; the peer can keep using the stream's teardown path.
    pub fn is_hard(&self) -> bool {
        !matches!(
            self,
            SyncError::LockTimeout { .. } | SyncError::UpdateFailures { .. }
        )
    }
}

impl From<WireError> for SyncError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Timeout { seconds, label } => SyncError::Timeout {
                seconds,
                label: label.to_string(),
            },
            WireError::UnexpectedEof => SyncError::Protocol {
                msg: "unexpected end of stream".to_string(),
            },
            WireError::LineTooLong { limit } => SyncError::Protocol {
                msg: format!("line exceeds {limit} bytes"),
            },
            WireError::NotUtf8 => SyncError::Protocol {
                msg: "line is not valid UTF-8".to_string(),
            },
            WireError::Io(err) => SyncError::Io(err),
        }
    }
}

impl From<SubrequestFault> for SyncError {
    fn from(fault: SubrequestFault) -> Self {
        SyncError::Protocol {
            msg: fault.to_string(),
        }
    }
}

impl From<SubrequestError> for SyncError {
    fn from(err: SubrequestError) -> Self {
        match err {
            SubrequestError::Wire(err) => err.into(),
            SubrequestError::Fault(fault) => fault.into(),
        }
    }
}
