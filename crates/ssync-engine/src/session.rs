//! Inbound session requests and the negotiated session context.

use uuid::Uuid;

use ssync_store::{PolicyRegistry, StoragePolicy};
use ssync_wire::message::{FRAG_INDEX_HEADER, NODE_INDEX_HEADER, POLICY_INDEX_HEADER};
use ssync_wire::HeaderMap;

use crate::error::NegotiationError;

/// An inbound ssync session request, as handed over by the dispatch layer:
/// the `/<device>/<partition>` path plus the session headers.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Request path.
    pub path: String,
    /// Session headers.
    pub headers: HeaderMap,
    /// Peer address, for log attribution only.
    pub remote_addr: String,
}

impl SyncRequest {
    /// A request for `path` with no headers and an unknown peer.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            headers: HeaderMap::new(),
            remote_addr: "-".to_string(),
        }
    }

    /// Builder-style header attachment.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value.into());
        self
    }

    /// Builder-style peer address attachment.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = addr.into();
        self
    }
}

/// Everything negotiated for one session. Immutable once constructed; owned
/// exclusively by the session task.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique id for log correlation.
    pub session_id: Uuid,
    /// Addressed device.
    pub device: String,
    /// Addressed partition.
    pub partition: String,
    /// Negotiated storage policy.
    pub policy: StoragePolicy,
    /// Fragment index, when the sender supplied one.
    pub frag_index: Option<u32>,
    /// Node index, when the sender supplied one. Equal to `frag_index` when
    /// both are present; enforced once at negotiation, never re-checked.
    pub node_index: Option<u32>,
    /// Peer address for log attribution.
    pub remote_addr: String,
}

impl SessionContext {
    /// Fragment index to hand the store: set only for policies that shard
    /// by fragment.
    pub fn store_frag_index(&self) -> Option<u32> {
        if self.policy.is_erasure_coded() {
            self.frag_index
        } else {
            None
        }
    }

    /// `peer/device/partition` prefix used in session log lines.
    pub fn log_prefix(&self) -> String {
        format!("{}/{}/{}", self.remote_addr, self.device, self.partition)
    }
}

/// Split a session path into exactly `(device, partition)`.
pub(crate) fn parse_path(path: &str) -> Result<(String, String), NegotiationError> {
    let invalid = || NegotiationError::InvalidPath {
        path: path.to_string(),
    };
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;
    let mut segments = rest.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(device), Some(partition), None) if !device.is_empty() && !partition.is_empty() => {
            Ok((device.to_string(), partition.to_string()))
        }
        _ => Err(invalid()),
    }
}

fn parse_index_header(
    headers: &HeaderMap,
    name: &str,
) -> Result<Option<u32>, NegotiationError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| NegotiationError::BadHeader {
                header: name.to_string(),
                value: value.to_string(),
            }),
    }
}

fn render_index(index: Option<u32>) -> String {
    index.map_or_else(|| "None".to_string(), |v| v.to_string())
}

/// Validate the policy/fragment/node headers against the configured
/// policies. Runs after the permit is held, before any disk or lock access.
pub(crate) fn validate_headers(
    headers: &HeaderMap,
    registry: &PolicyRegistry,
) -> Result<(StoragePolicy, Option<u32>, Option<u32>), NegotiationError> {
    let policy_index = parse_index_header(headers, POLICY_INDEX_HEADER)?.unwrap_or(0);
    let policy = registry
        .get(policy_index)
        .ok_or(NegotiationError::UnknownPolicy {
            index: policy_index,
        })?;

    let frag_index = parse_index_header(headers, FRAG_INDEX_HEADER)?;
    let node_index = parse_index_header(headers, NODE_INDEX_HEADER)?;
    if node_index.is_some() && frag_index != node_index {
        return Err(NegotiationError::IndexMismatch {
            frag: render_index(frag_index),
            node: render_index(node_index),
        });
    }

    Ok((policy, frag_index, node_index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssync_store::PolicyRegistry;

    fn two_policy_registry() -> PolicyRegistry {
        PolicyRegistry::new(vec![
            StoragePolicy::replicated(0),
            StoragePolicy::erasure_coded(1),
        ])
    }

    #[test]
    fn test_parse_path_accepts_device_partition() {
        assert_eq!(
            parse_path("/sda1/1").unwrap(),
            ("sda1".to_string(), "1".to_string())
        );
    }

    #[test]
    fn test_parse_path_rejects_wrong_shapes() {
        for path in ["/device", "/device/", "/device/partition/junk", "device/partition", ""] {
            match parse_path(path) {
                Err(NegotiationError::InvalidPath { path: p }) => assert_eq!(p, path),
                other => panic!("expected InvalidPath for {path:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_headers_default_to_policy_zero() {
        let (policy, frag, node) =
            validate_headers(&HeaderMap::new(), &two_policy_registry()).unwrap();
        assert_eq!(policy.index, 0);
        assert_eq!(frag, None);
        assert_eq!(node, None);
    }

    #[test]
    fn test_unknown_policy_index() {
        let mut headers = HeaderMap::new();
        headers.insert(POLICY_INDEX_HEADER, "2");
        match validate_headers(&headers, &two_policy_registry()) {
            Err(err @ NegotiationError::UnknownPolicy { .. }) => {
                assert_eq!(err.to_string(), "No policy with index 2");
            }
            other => panic!("expected UnknownPolicy, got {other:?}"),
        }
    }

    #[test]
    fn test_frag_index_alone_is_fine() {
        let mut headers = HeaderMap::new();
        headers.insert(POLICY_INDEX_HEADER, "1");
        headers.insert(FRAG_INDEX_HEADER, "7");
        let (policy, frag, node) = validate_headers(&headers, &two_policy_registry()).unwrap();
        assert!(policy.is_erasure_coded());
        assert_eq!(frag, Some(7));
        assert_eq!(node, None);
    }

    #[test]
    fn test_node_index_alone_is_a_mismatch() {
        let mut headers = HeaderMap::new();
        headers.insert(NODE_INDEX_HEADER, "7");
        match validate_headers(&headers, &two_policy_registry()) {
            Err(err @ NegotiationError::IndexMismatch { .. }) => {
                assert_eq!(err.to_string(), "Frag-Index (None) != Node-Index (7)");
            }
            other => panic!("expected IndexMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_indexes_name_both_values() {
        let mut headers = HeaderMap::new();
        headers.insert(FRAG_INDEX_HEADER, "7");
        headers.insert(NODE_INDEX_HEADER, "6");
        match validate_headers(&headers, &two_policy_registry()) {
            Err(err @ NegotiationError::IndexMismatch { .. }) => {
                assert_eq!(err.to_string(), "Frag-Index (7) != Node-Index (6)");
            }
            other => panic!("expected IndexMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_matched_indexes_pass() {
        let mut headers = HeaderMap::new();
        headers.insert(FRAG_INDEX_HEADER, "7");
        headers.insert(NODE_INDEX_HEADER, "7");
        let (_, frag, node) = validate_headers(&headers, &two_policy_registry()).unwrap();
        assert_eq!(frag, Some(7));
        assert_eq!(node, Some(7));
    }

    #[test]
    fn test_non_numeric_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(POLICY_INDEX_HEADER, "abc");
        match validate_headers(&headers, &two_policy_registry()) {
            Err(NegotiationError::BadHeader { header, value }) => {
                assert_eq!(header, POLICY_INDEX_HEADER);
                assert_eq!(value, "abc");
            }
            other => panic!("expected BadHeader, got {other:?}"),
        }
    }

    #[test]
    fn test_store_frag_index_only_for_ec_policies() {
        let base = SessionContext {
            session_id: Uuid::new_v4(),
            device: "sda1".into(),
            partition: "1".into(),
            policy: StoragePolicy::replicated(0),
            frag_index: Some(7),
            node_index: Some(7),
            remote_addr: "-".into(),
        };
        assert_eq!(base.store_frag_index(), None);
        let ec = SessionContext {
            policy: StoragePolicy::erasure_coded(1),
            ..base
        };
        assert_eq!(ec.store_frag_index(), Some(7));
    }
}
