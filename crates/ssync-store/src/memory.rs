//! In-memory reference store used by tests and demos in place of the disk
//! backend.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use ssync_wire::message::{FRAG_INDEX_HEADER, POLICY_INDEX_HEADER, REPLICATION_MANIFEST_HEADER};
use ssync_wire::{BodyRead, HeaderMap, Method, Subrequest, WireError};

use crate::error::Result;
use crate::store::{ObjectState, ObjectStore, PartitionRef, StoredObject};
use crate::types::{ObjectKey, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectLocation {
    device: String,
    partition: String,
    policy_index: u32,
    frag_index: Option<u32>,
    hash: String,
}

impl ObjectLocation {
    fn new(part: &PartitionRef, frag_index: Option<u32>, hash: &str) -> Self {
        Self {
            device: part.device.clone(),
            partition: part.partition.clone(),
            policy_index: part.policy_index,
            frag_index,
            hash: hash.to_string(),
        }
    }
}

/// In-memory object store keyed by (device, partition, policy, fragment,
/// hash). PUTs persist exactly the replication-manifest header set; stale
/// versions are refused with 409.
#[derive(Default)]
pub struct InMemoryStore {
    mount_check: bool,
    devices: DashMap<String, bool>,
    objects: DashMap<ObjectLocation, StoredObject>,
}

impl InMemoryStore {
    /// An empty store with mount checking disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable mount checking; devices must then be registered mounted.
    pub fn with_mount_check(mut self) -> Self {
        self.mount_check = true;
        self
    }

    /// Register a device as mounted.
    pub fn add_device(&self, device: &str) {
        self.devices.insert(device.to_string(), true);
    }

    /// Mark a registered device unmounted.
    pub fn unmount_device(&self, device: &str) {
        self.devices.insert(device.to_string(), false);
    }

    /// Derive the opaque inventory hash for an object name.
    pub fn hash_name(name: &str) -> String {
        blake3::hash(name.as_bytes()).to_hex()[..32].to_string()
    }

    /// Seed a live object directly (test/setup path, no version check).
    pub fn put_object(
        &self,
        part: &PartitionRef,
        frag_index: Option<u32>,
        name: &str,
        timestamp: Timestamp,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> String {
        let hash = Self::hash_name(name);
        self.objects.insert(
            ObjectLocation::new(part, frag_index, &hash),
            StoredObject {
                name: name.to_string(),
                state: ObjectState::Object {
                    timestamp,
                    headers,
                    body: body.into(),
                },
            },
        );
        hash
    }

    /// Seed a tombstone directly (test/setup path, no version check).
    pub fn delete_object(
        &self,
        part: &PartitionRef,
        frag_index: Option<u32>,
        name: &str,
        timestamp: Timestamp,
    ) -> String {
        let hash = Self::hash_name(name);
        self.objects.insert(
            ObjectLocation::new(part, frag_index, &hash),
            StoredObject {
                name: name.to_string(),
                state: ObjectState::Tombstone { timestamp },
            },
        );
        hash
    }

    /// Current state for an object name, if any.
    pub fn object(
        &self,
        part: &PartitionRef,
        frag_index: Option<u32>,
        name: &str,
    ) -> Option<StoredObject> {
        let hash = Self::hash_name(name);
        self.objects
            .get(&ObjectLocation::new(part, frag_index, &hash))
            .map(|entry| entry.value().clone())
    }

    /// Split `/<device>/<partition>/<account>/<container>/<object>` into the
    /// addressed location pieces.
    fn split_path(path: &str) -> Option<(&str, &str, String)> {
        let rest = path.strip_prefix('/')?;
        let (device, rest) = rest.split_once('/')?;
        let (partition, name) = rest.split_once('/')?;
        if device.is_empty() || partition.is_empty() || name.is_empty() {
            return None;
        }
        Some((device, partition, format!("/{name}")))
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    fn requires_mount_check(&self) -> bool {
        self.mount_check
    }

    async fn device_available(&self, device: &str) -> bool {
        self.devices.get(device).map(|d| *d).unwrap_or(false)
    }

    async fn newest_timestamp(
        &self,
        part: &PartitionRef,
        frag_index: Option<u32>,
        object_hash: &str,
    ) -> Result<Option<Timestamp>> {
        Ok(self
            .objects
            .get(&ObjectLocation::new(part, frag_index, object_hash))
            .map(|entry| entry.value().state.timestamp()))
    }

    async fn inventory(
        &self,
        part: &PartitionRef,
        frag_index: Option<u32>,
    ) -> Result<Vec<ObjectKey>> {
        let mut keys: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|entry| {
                let loc = entry.key();
                loc.device == part.device
                    && loc.partition == part.partition
                    && loc.policy_index == part.policy_index
                    && loc.frag_index == frag_index
            })
            .map(|entry| ObjectKey::new(entry.key().hash.clone(), entry.value().state.timestamp()))
            .collect();
        keys.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(keys)
    }

    async fn load(
        &self,
        part: &PartitionRef,
        frag_index: Option<u32>,
        object_hash: &str,
    ) -> Result<Option<StoredObject>> {
        Ok(self
            .objects
            .get(&ObjectLocation::new(part, frag_index, object_hash))
            .map(|entry| entry.value().clone()))
    }

    async fn apply(
        &self,
        subreq: &Subrequest,
        body: &mut dyn BodyRead,
    ) -> std::result::Result<u16, WireError> {
        let Some((device, partition, name)) = Self::split_path(&subreq.path) else {
            return Ok(400);
        };
        let Some(timestamp) = subreq
            .headers
            .get("x-timestamp")
            .and_then(|v| v.parse::<Timestamp>().ok())
        else {
            return Ok(400);
        };
        let Some(policy_index) = subreq
            .headers
            .get(POLICY_INDEX_HEADER)
            .and_then(|v| v.parse::<u32>().ok())
        else {
            return Ok(400);
        };
        let frag_index = subreq
            .headers
            .get(FRAG_INDEX_HEADER)
            .and_then(|v| v.parse::<u32>().ok());

        let part = PartitionRef::new(device, partition, policy_index);
        let hash = Self::hash_name(&name);
        let location = ObjectLocation::new(&part, frag_index, &hash);

        let stale = self
            .objects
            .get(&location)
            .map(|entry| entry.value().state.timestamp() >= timestamp)
            .unwrap_or(false);

        match subreq.method {
            Method::Put => {
                let content = body.read_all().await?;
                if stale {
                    return Ok(409);
                }
                // persist exactly the manifest's header set
                let manifest = subreq
                    .headers
                    .get(REPLICATION_MANIFEST_HEADER)
                    .unwrap_or_default()
                    .to_string();
                let persisted: HeaderMap = subreq
                    .headers
                    .iter()
                    .filter(|(n, _)| {
                        manifest
                            .split_whitespace()
                            .any(|m| m.eq_ignore_ascii_case(n))
                    })
                    .collect();
                debug!(name = %name, timestamp = %timestamp, "replicated object write");
                self.objects.insert(
                    location,
                    StoredObject {
                        name,
                        state: ObjectState::Object {
                            timestamp,
                            headers: persisted,
                            body: content,
                        },
                    },
                );
                Ok(201)
            }
            Method::Delete => {
                if stale {
                    return Ok(409);
                }
                debug!(name = %name, timestamp = %timestamp, "replicated object delete");
                self.objects.insert(
                    location,
                    StoredObject {
                        name,
                        state: ObjectState::Tombstone { timestamp },
                    },
                );
                Ok(204)
            }
        }
    }
}
