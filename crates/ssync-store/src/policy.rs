//! Storage policies and the configured-policy registry.

use serde::{Deserialize, Serialize};

/// How a policy places object data on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Whole-object copies on each assigned node.
    Replicated,
    /// Erasure-coded fragments, sharded by fragment index.
    ErasureCoded,
}

/// One configured storage policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Cluster-wide policy index carried in session headers.
    pub index: u32,
    /// Placement scheme.
    pub kind: PolicyKind,
}

impl StoragePolicy {
    /// A replicated policy.
    pub fn replicated(index: u32) -> Self {
        Self {
            index,
            kind: PolicyKind::Replicated,
        }
    }

    /// An erasure-coded policy.
    pub fn erasure_coded(index: u32) -> Self {
        Self {
            index,
            kind: PolicyKind::ErasureCoded,
        }
    }

    /// Whether this policy shards the store by fragment index.
    pub fn is_erasure_coded(&self) -> bool {
        self.kind == PolicyKind::ErasureCoded
    }
}

/// The set of policies this node is configured with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRegistry {
    policies: Vec<StoragePolicy>,
}

impl PolicyRegistry {
    /// Registry over an explicit policy list.
    pub fn new(policies: Vec<StoragePolicy>) -> Self {
        Self { policies }
    }

    /// Look up a policy by index.
    pub fn get(&self, index: u32) -> Option<StoragePolicy> {
        self.policies.iter().copied().find(|p| p.index == index)
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self {
            policies: vec![StoragePolicy::replicated(0)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_policy_zero() {
        let registry = PolicyRegistry::default();
        let policy = registry.get(0).unwrap();
        assert_eq!(policy.kind, PolicyKind::Replicated);
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn test_lookup_by_index() {
        let registry = PolicyRegistry::new(vec![
            StoragePolicy::replicated(0),
            StoragePolicy::erasure_coded(1),
        ]);
        assert!(registry.get(1).unwrap().is_erasure_coded());
        assert!(registry.get(2).is_none());
    }
}
