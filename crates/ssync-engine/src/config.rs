//! Engine configuration.

use std::time::Duration;

use serde::Deserialize;

/// Tunables for both session roles.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on every individual line or body-chunk read, in seconds.
    pub client_timeout_secs: f64,
    /// Bound on the per-device replication-lock wait, in seconds.
    pub lock_timeout_secs: f64,
    /// Body read granularity and maximum accepted line length, in bytes.
    pub network_chunk_size: usize,
    /// Simultaneous ssync sessions allowed per node (0 = unlimited).
    pub replication_concurrency: usize,
    /// Minimum failure count before the update circuit breaker can trip.
    pub replication_failure_threshold: u64,
    /// Failures tolerated per success before the breaker trips.
    pub replication_failure_ratio: f64,
    /// Root under which per-device lock paths are rendered in contention
    /// messages.
    pub lock_root: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_timeout_secs: 60.0,
            lock_timeout_secs: 15.0,
            network_chunk_size: 65536,
            replication_concurrency: 4,
            replication_failure_threshold: 100,
            replication_failure_ratio: 1.0,
            lock_root: "/var/lock/ssync".to_string(),
        }
    }
}

impl EngineConfig {
    /// Per-read timeout as a [`Duration`].
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.client_timeout_secs)
    }

    /// Lock-acquisition timeout as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.lock_timeout_secs)
    }
}
