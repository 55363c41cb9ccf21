//! The storage-collaborator seam between the protocol engine and whatever
//! actually holds object data.

use async_trait::async_trait;
use bytes::Bytes;

use ssync_wire::{BodyRead, HeaderMap, Subrequest, WireError};

use crate::error::Result;
use crate::types::{ObjectKey, Timestamp};

/// Addresses one partition of one device under one policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionRef {
    /// Device name, first path segment of the session address.
    pub device: String,
    /// Partition name, second path segment.
    pub partition: String,
    /// Negotiated storage-policy index.
    pub policy_index: u32,
}

impl PartitionRef {
    /// Create a partition reference.
    pub fn new(
        device: impl Into<String>,
        partition: impl Into<String>,
        policy_index: u32,
    ) -> Self {
        Self {
            device: device.into(),
            partition: partition.into(),
            policy_index,
        }
    }
}

/// Full current state of one object, as the sender needs it.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Object name (`/account/container/object`).
    pub name: String,
    /// Live data or tombstone.
    pub state: ObjectState,
}

/// Either a live object or a deletion marker.
#[derive(Debug, Clone)]
pub enum ObjectState {
    /// The object was deleted at this version.
    Tombstone {
        /// Deletion version.
        timestamp: Timestamp,
    },
    /// A live object with its persisted metadata and body.
    Object {
        /// Write version.
        timestamp: Timestamp,
        /// Persisted metadata headers, in persisted order.
        headers: HeaderMap,
        /// Object content.
        body: Bytes,
    },
}

impl ObjectState {
    /// The version token of this state.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            ObjectState::Tombstone { timestamp } => *timestamp,
            ObjectState::Object { timestamp, .. } => *timestamp,
        }
    }
}

/// The storage collaborator.
///
/// The protocol engine treats this surface as already concurrency-safe for
/// object-level access; it adds no serialization beyond the per-device
/// replication lock.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether sessions must verify device availability before locking.
    fn requires_mount_check(&self) -> bool {
        false
    }

    /// Whether the named device is mounted and usable. Only consulted when
    /// [`Self::requires_mount_check`] returns true.
    async fn device_available(&self, device: &str) -> bool;

    /// Newest locally-held version for a hash — data or tombstone — under
    /// the given policy and, for fragment-sharded policies, fragment index.
    async fn newest_timestamp(
        &self,
        part: &PartitionRef,
        frag_index: Option<u32>,
        object_hash: &str,
    ) -> Result<Option<Timestamp>>;

    /// One key per locally-held hash (its newest version), in a stable
    /// order. Tombstones are inventory too; deletions replicate.
    async fn inventory(&self, part: &PartitionRef, frag_index: Option<u32>)
        -> Result<Vec<ObjectKey>>;

    /// Full state for one hash, for building an update subrequest.
    async fn load(
        &self,
        part: &PartitionRef,
        frag_index: Option<u32>,
        object_hash: &str,
    ) -> Result<Option<StoredObject>>;

    /// Apply one replication-origin subrequest.
    ///
    /// The subrequest carries the replication marker and manifest headers;
    /// the store must honor exactly that header set rather than client-write
    /// filtering. Returns an HTTP-style status (2xx counts as success).
    /// Stream failures reading `body` are session-fatal and propagate.
    async fn apply(
        &self,
        subreq: &Subrequest,
        body: &mut dyn BodyRead,
    ) -> std::result::Result<u16, WireError>;
}
