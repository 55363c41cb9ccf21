//! Subrequest framing for the update phase.
//!
//! Each subrequest is one request line (`METHOD path`), zero or more header
//! lines, a blank line, then — when a content length was declared — exactly
//! that many body bytes with no trailing delimiter.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::WireError;
use crate::line::LineChannel;
use crate::message::UPDATES_END;

/// Ordered header bag with case-insensitive lookup.
///
/// Insertion order is preserved so the replication-headers manifest is
/// deterministic; lookups ignore case the way HTTP header handling does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// An empty header bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping the name's case as given.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any header with this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Space-joined lowercase header names, in insertion order. This is the
    /// replication-headers manifest format.
    pub fn manifest(&self) -> String {
        self.entries
            .iter()
            .map(|(n, _)| n.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// Subrequest verbs the update engine will dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Replicate an object write, body bytes follow the headers.
    Put,
    /// Replicate a deletion, never carries a body.
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// A subrequest as parsed off the wire, before the update engine has applied
/// its method/content-length rules or injected the replication headers.
#[derive(Debug, Clone)]
pub struct RawSubrequest {
    /// Verb token as sent, not yet validated against the allowed set.
    pub method: String,
    /// Object path as sent (e.g. `/a/c/o`).
    pub path: String,
    /// Headers in the order the sender supplied them.
    pub headers: HeaderMap,
    /// Parsed `Content-Length`, when one was sent.
    pub content_length: Option<u64>,
}

/// A validated subrequest ready for dispatch to the storage collaborator.
#[derive(Debug, Clone)]
pub struct Subrequest {
    /// Validated verb.
    pub method: Method,
    /// Full storage path, `/<device>/<partition><object path>`.
    pub path: String,
    /// Sender-supplied headers followed by the injected replication headers.
    pub headers: HeaderMap,
}

/// Framing violations inside one subrequest. Each is fatal to the whole
/// update phase.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubrequestFault {
    /// Request line did not split into exactly `METHOD path`.
    #[error("invalid subrequest line {line:?}")]
    BadRequestLine {
        /// The offending line.
        line: String,
    },

    /// Stream ended before the blank line terminating the header block.
    #[error("Got no headers for {method} {path}")]
    NoHeaders {
        /// Verb from the request line.
        method: String,
        /// Path from the request line.
        path: String,
    },

    /// A header line without a colon separator.
    #[error("invalid header line {line:?}")]
    BadHeaderLine {
        /// The offending line.
        line: String,
    },

    /// A `Content-Length` value that does not parse as an unsigned integer.
    #[error("invalid content-length {value:?}")]
    BadContentLength {
        /// The offending value.
        value: String,
    },
}

/// Errors reading a subrequest: transport failures or framing faults.
#[derive(Debug, Error)]
pub enum SubrequestError {
    /// The channel failed (timeout, EOF inside a read, I/O).
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The peer sent a malformed subrequest.
    #[error(transparent)]
    Fault(#[from] SubrequestFault),
}

/// Read the next subrequest head (request line + headers) off the channel.
///
/// Returns `Ok(None)` at the section's end marker or end of stream. The body,
/// if any, is left unread on the channel; the caller is responsible for
/// consuming exactly the declared length before the next call.
pub async fn read_subrequest<S>(
    chan: &mut LineChannel<S>,
) -> Result<Option<RawSubrequest>, SubrequestError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let line = match chan.read_line("updates line").await? {
        None => return Ok(None),
        Some(line) => line,
    };
    let trimmed = line.trim();
    if trimmed == UPDATES_END {
        return Ok(None);
    }

    let mut tokens = trimmed.split_whitespace();
    let (method, path) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(path), None) => (method.to_string(), path.to_string()),
        _ => {
            return Err(SubrequestFault::BadRequestLine {
                line: trimmed.to_string(),
            }
            .into())
        }
    };

    let mut headers = HeaderMap::new();
    loop {
        let line = match chan.read_line("updates line").await? {
            None => {
                return Err(SubrequestFault::NoHeaders { method, path }.into());
            }
            Some(line) => line,
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(SubrequestFault::BadHeaderLine {
                line: line.to_string(),
            }
            .into());
        };
        headers.insert(name.trim(), value.trim());
    }

    let content_length = match headers.get("content-length") {
        None => None,
        Some(value) => Some(value.parse::<u64>().map_err(|_| {
            SubrequestFault::BadContentLength {
                value: value.to_string(),
            }
        })?),
    };

    Ok(Some(RawSubrequest {
        method,
        path,
        headers,
        content_length,
    }))
}
