//! The sender side of an ssync session: the driver run on the node that
//! initiates a sync job against a peer.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use uuid::Uuid;

use ssync_store::{ObjectState, ObjectStore, PartitionRef};
use ssync_wire::message::{
    FRAG_INDEX_HEADER, MISSING_CHECK_END, MISSING_CHECK_START, NODE_INDEX_HEADER,
    POLICY_INDEX_HEADER, UPDATES_END, UPDATES_START,
};
use ssync_wire::{ErrorLine, LineChannel};

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::session::SyncRequest;

/// One sync job handed down by the scheduler: which partition to reconcile
/// against which peer, under which policy and fragment identity.
#[derive(Debug, Clone)]
pub struct SyncJob {
    /// Local and remote device name.
    pub device: String,
    /// Partition to reconcile.
    pub partition: String,
    /// Storage-policy index.
    pub policy_index: u32,
    /// Fragment index for erasure-coded policies.
    pub frag_index: Option<u32>,
    /// Node index; when set it must equal `frag_index` or the receiver will
    /// refuse the session.
    pub node_index: Option<u32>,
    /// Peer address, for log attribution only.
    pub remote_addr: String,
}

impl SyncJob {
    /// A replicated-policy job.
    pub fn new(device: impl Into<String>, partition: impl Into<String>, policy_index: u32) -> Self {
        Self {
            device: device.into(),
            partition: partition.into(),
            policy_index,
            frag_index: None,
            node_index: None,
            remote_addr: "-".to_string(),
        }
    }

    /// Attach matching fragment and node indexes.
    pub fn with_frag_index(mut self, index: u32) -> Self {
        self.frag_index = Some(index);
        self.node_index = Some(index);
        self
    }
}

/// What one sender session accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// Session id, matches the log events.
    pub session_id: Uuid,
    /// Keys advertised during missing-check.
    pub candidates: usize,
    /// Hashes the receiver asked for.
    pub wanted: usize,
    /// Subrequests actually sent (wanted plus known-stale extras that were
    /// still loadable).
    pub sent: usize,
}

/// The sender protocol engine.
pub struct Sender<St> {
    store: Arc<St>,
    config: EngineConfig,
}

impl<St: ObjectStore> Sender<St> {
    /// A sender over the local `store`.
    pub fn new(store: Arc<St>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// The session request the dispatch layer should deliver to the peer
    /// when opening this job's stream.
    pub fn request(&self, job: &SyncJob) -> SyncRequest {
        let mut req = SyncRequest::new(format!("/{}/{}", job.device, job.partition))
            .with_header(POLICY_INDEX_HEADER, job.policy_index.to_string());
        if let Some(frag_index) = job.frag_index {
            req = req.with_header(FRAG_INDEX_HEADER, frag_index.to_string());
        }
        if let Some(node_index) = job.node_index {
            req = req.with_header(NODE_INDEX_HEADER, node_index.to_string());
        }
        req
    }

    /// Drive one session over an established stream.
    ///
    /// `known_stale` lists object hashes the caller independently knows the
    /// peer is missing; they are synced even if the receiver did not ask.
    /// Success means the full protocol ran and the receiver acknowledged
    /// both phases without an error line.
    pub async fn sync<S>(
        &self,
        job: &SyncJob,
        stream: S,
        known_stale: &[String],
    ) -> Result<SenderReport, SyncError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let session_id = Uuid::new_v4();
        let mut chan = LineChannel::new(
            stream,
            self.config.client_timeout(),
            self.config.network_chunk_size,
        );
        match self.run(session_id, job, &mut chan, known_stale).await {
            Ok(report) => {
                info!(
                    session = %session_id,
                    candidates = report.candidates,
                    wanted = report.wanted,
                    sent = report.sent,
                    "{}/{}/{} ssync job complete",
                    job.remote_addr,
                    job.device,
                    job.partition
                );
                Ok(report)
            }
            Err(err) => {
                warn!(
                    session = %session_id,
                    "{}/{}/{} ssync job failed: {}",
                    job.remote_addr,
                    job.device,
                    job.partition,
                    err
                );
                chan.shutdown().await;
                Err(err)
            }
        }
    }

    async fn run<S>(
        &self,
        session_id: Uuid,
        job: &SyncJob,
        chan: &mut LineChannel<S>,
        known_stale: &[String],
    ) -> Result<SenderReport, SyncError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let part = PartitionRef::new(job.device.clone(), job.partition.clone(), job.policy_index);

        // advertise the local inventory
        let inventory = self.store.inventory(&part, job.frag_index).await?;
        chan.write_line(MISSING_CHECK_START).await?;
        for key in &inventory {
            chan.write_line(&format!("{} {}", key.hash, key.timestamp))
                .await?;
        }
        chan.write_line(MISSING_CHECK_END).await?;
        chan.flush().await?;

        // collect the receiver's wanted list
        self.expect_marker(chan, MISSING_CHECK_START, "missing_check start wait")
            .await?;
        let mut wanted = Vec::new();
        loop {
            let line = chan
                .read_line("missing_check line wait")
                .await?
                .ok_or(SyncError::ConnectionClosed)?;
            let line = line.trim();
            if let Some(err) = ErrorLine::parse(line) {
                return Err(SyncError::Remote {
                    status: err.status,
                    message: err.message,
                });
            }
            if line == MISSING_CHECK_END {
                break;
            }
            if !line.is_empty() {
                wanted.push(line.to_string());
            }
        }
        debug!(
            session = %session_id,
            candidates = inventory.len(),
            wanted = wanted.len(),
            "missing_check complete"
        );

        // wanted order first, then extras the caller knows are stale
        let mut send_list = wanted.clone();
        for hash in known_stale {
            if !send_list.contains(hash) {
                send_list.push(hash.clone());
            }
        }

        // stream one subrequest per object
        chan.write_line(UPDATES_START).await?;
        let mut sent = 0usize;
        for hash in &send_list {
            let Some(object) = self.store.load(&part, job.frag_index, hash).await? else {
                warn!(session = %session_id, hash = %hash, "wanted hash not found locally, skipping");
                continue;
            };
            match object.state {
                ObjectState::Tombstone { timestamp } => {
                    chan.write_line(&format!("DELETE {}", object.name)).await?;
                    chan.write_line(&format!("X-Timestamp: {timestamp}")).await?;
                    chan.write_line("").await?;
                }
                ObjectState::Object {
                    timestamp,
                    headers,
                    body,
                } => {
                    chan.write_line(&format!("PUT {}", object.name)).await?;
                    chan.write_line(&format!("Content-Length: {}", body.len()))
                        .await?;
                    chan.write_line(&format!("X-Timestamp: {timestamp}")).await?;
                    for (name, value) in headers.iter() {
                        if name.eq_ignore_ascii_case("content-length")
                            || name.eq_ignore_ascii_case("x-timestamp")
                        {
                            continue;
                        }
                        chan.write_line(&format!("{name}: {value}")).await?;
                    }
                    chan.write_line("").await?;
                    chan.write_raw(&body).await?;
                }
            }
            sent += 1;
        }
        chan.write_line(UPDATES_END).await?;
        chan.flush().await?;

        // wait for the receiver's acknowledgment
        self.expect_marker(chan, UPDATES_START, "updates start wait")
            .await?;
        self.expect_marker(chan, UPDATES_END, "updates line wait")
            .await?;

        Ok(SenderReport {
            session_id,
            candidates: inventory.len(),
            wanted: wanted.len(),
            sent,
        })
    }

    async fn expect_marker<S>(
        &self,
        chan: &mut LineChannel<S>,
        marker: &str,
        label: &'static str,
    ) -> Result<(), SyncError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        loop {
            let line = chan
                .read_line(label)
                .await?
                .ok_or(SyncError::ConnectionClosed)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(err) = ErrorLine::parse(line) {
                return Err(SyncError::Remote {
                    status: err.status,
                    message: err.message,
                });
            }
            if line == marker {
                return Ok(());
            }
            return Err(SyncError::Protocol {
                msg: format!("expected {marker} got {line:?}"),
            });
        }
    }
}
