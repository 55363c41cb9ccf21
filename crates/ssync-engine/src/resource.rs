//! Session-scoped resources: the node-wide concurrency permit pool and the
//! per-device replication locks.
//!
//! Both hand out owned RAII guards so release happens exactly once on every
//! exit path, including error unwinds.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::error::SyncError;

/// Bounds how many ssync sessions run on this node at once. Acquisition
/// never waits: a full pool is an immediate deny.
pub struct ReplicationPermits {
    sem: Option<Arc<Semaphore>>,
}

impl ReplicationPermits {
    /// A pool of `count` permits; 0 disables the bound.
    pub fn new(count: usize) -> Self {
        Self {
            sem: (count > 0).then(|| Arc::new(Semaphore::new(count))),
        }
    }

    /// Try to take a permit. `None` means the node is at capacity.
    pub fn try_acquire(&self) -> Option<PermitGuard> {
        match &self.sem {
            None => Some(PermitGuard { _permit: None }),
            Some(sem) => sem
                .clone()
                .try_acquire_owned()
                .ok()
                .map(|permit| PermitGuard {
                    _permit: Some(permit),
                }),
        }
    }
}

/// Holds one session's permit; dropping it returns the permit to the pool.
pub struct PermitGuard {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Per-device mutual exclusion serializing replication activity on a device.
pub struct DeviceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    wait: Duration,
    root: String,
}

impl DeviceLocks {
    /// A lock table whose acquisitions wait at most `wait`. `root` is only
    /// used to render the lock path in contention messages.
    pub fn new(root: impl Into<String>, wait: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            wait,
            root: root.into(),
        }
    }

    /// The rendered lock path for a device.
    pub fn lock_path(&self, device: &str) -> String {
        format!("{}/{}", self.root, device)
    }

    /// Acquire the device's lock, waiting up to the configured bound.
    pub async fn acquire(&self, device: &str) -> Result<DeviceLockGuard, SyncError> {
        let lock = self
            .locks
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        match timeout(self.wait, lock.lock_owned()).await {
            Ok(guard) => Ok(DeviceLockGuard { _guard: guard }),
            Err(_) => Err(SyncError::LockTimeout {
                seconds: self.wait.as_secs_f64(),
                path: self.lock_path(device),
            }),
        }
    }
}

/// Holds one session's device lock; dropping it releases the device.
pub struct DeviceLockGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permits_deny_at_capacity_and_release_on_drop() {
        let permits = ReplicationPermits::new(2);
        let a = permits.try_acquire().unwrap();
        let _b = permits.try_acquire().unwrap();
        assert!(permits.try_acquire().is_none());
        drop(a);
        assert!(permits.try_acquire().is_some());
    }

    #[test]
    fn test_zero_concurrency_is_unlimited() {
        let permits = ReplicationPermits::new(0);
        let _guards: Vec<_> = (0..64).map(|_| permits.try_acquire().unwrap()).collect();
        assert!(permits.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_lock_contention_times_out_with_path() {
        let locks = DeviceLocks::new("/somewhere", Duration::from_millis(10));
        let _held = locks.acquire("sda1").await.unwrap();
        match locks.acquire("sda1").await {
            Err(SyncError::LockTimeout { path, seconds }) => {
                assert_eq!(path, "/somewhere/sda1");
                assert!((seconds - 0.01).abs() < 1e-9);
            }
            other => panic!("expected LockTimeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_different_devices_do_not_contend() {
        let locks = DeviceLocks::new("/somewhere", Duration::from_millis(10));
        let _a = locks.acquire("sda1").await.unwrap();
        assert!(locks.acquire("sdb1").await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let locks = DeviceLocks::new("/somewhere", Duration::from_millis(10));
        let held = locks.acquire("sda1").await.unwrap();
        drop(held);
        assert!(locks.acquire("sda1").await.is_ok());
    }
}
