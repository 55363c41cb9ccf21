//! Wire grammar: phase markers, in-band error lines, inventory lines, and
//! the header names the protocol recognizes or injects.

/// Opens the missing-check section in both directions.
pub const MISSING_CHECK_START: &str = ":MISSING_CHECK: START";
/// Closes the missing-check section in both directions.
pub const MISSING_CHECK_END: &str = ":MISSING_CHECK: END";
/// Opens the updates section in both directions.
pub const UPDATES_START: &str = ":UPDATES: START";
/// Closes the updates section in both directions.
pub const UPDATES_END: &str = ":UPDATES: END";

/// Session header naming the storage-policy index (defaults to 0).
pub const POLICY_INDEX_HEADER: &str = "X-Backend-Storage-Policy-Index";
/// Session header naming the fragment index an erasure-coded node holds.
pub const FRAG_INDEX_HEADER: &str = "X-Backend-Ssync-Frag-Index";
/// Session header naming the node index; must equal the fragment index.
pub const NODE_INDEX_HEADER: &str = "X-Backend-Ssync-Node-Index";
/// Injected on forwarded subrequests to mark a replication-origin write.
pub const REPLICATION_MARKER_HEADER: &str = "X-Backend-Replication";
/// Injected manifest of exactly the sender-supplied header names.
pub const REPLICATION_MANIFEST_HEADER: &str = "X-Backend-Replication-Headers";

/// An in-band `:ERROR:` line: numeric status (0 when no HTTP-style status
/// applies) and a quoted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLine {
    /// HTTP-style status, or 0 for locally-detected protocol errors.
    pub status: u16,
    /// Human-readable message, unquoted.
    pub message: String,
}

impl ErrorLine {
    /// Create an error line.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Render for the wire. Single-quoted unless the message embeds a single
    /// quote, in which case double quotes are used.
    pub fn render(&self) -> String {
        if self.message.contains('\'') {
            format!(":ERROR: {} \"{}\"", self.status, self.message)
        } else {
            format!(":ERROR: {} '{}'", self.status, self.message)
        }
    }

    /// Parse a line previously produced by [`Self::render`]. Returns `None`
    /// for anything that is not an error line.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(":ERROR: ")?;
        let (status, quoted) = rest.split_once(' ')?;
        let status = status.parse().ok()?;
        let message = if quoted.len() >= 2
            && (quoted.starts_with('\'') && quoted.ends_with('\'')
                || quoted.starts_with('"') && quoted.ends_with('"'))
        {
            quoted[1..quoted.len() - 1].to_string()
        } else {
            quoted.to_string()
        };
        Some(Self { status, message })
    }
}

/// One advertised object on a missing-check line: hash, timestamp, and any
/// number of trailing tokens reserved for future protocol revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryLine {
    /// Opaque object hash.
    pub hash: String,
    /// Timestamp token, uninterpreted at this layer.
    pub timestamp: String,
}

impl InventoryLine {
    /// Split a missing-check body line. Trailing tokens beyond the first two
    /// are accepted and ignored; fewer than two tokens is malformed.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let timestamp = parts.next()?;
        Some(Self {
            hash: hash.to_string(),
            timestamp: timestamp.to_string(),
        })
    }
}
