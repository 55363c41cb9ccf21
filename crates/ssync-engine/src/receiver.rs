//! The receiver side of an ssync session.
//!
//! One `Receiver` per node owns the permit pool and the device lock table;
//! each inbound connection runs [`Receiver::handle`] on its own task. The
//! session is a strict state progression — negotiate, missing-check,
//! updates, done — and any phase failure aborts the remainder.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ssync_store::{ObjectStore, PartitionRef, PolicyRegistry, Timestamp};
use ssync_wire::line::BodyRead;
use ssync_wire::message::{
    FRAG_INDEX_HEADER, MISSING_CHECK_END, MISSING_CHECK_START, POLICY_INDEX_HEADER,
    REPLICATION_MANIFEST_HEADER, REPLICATION_MARKER_HEADER, UPDATES_END, UPDATES_START,
};
use ssync_wire::subrequest::read_subrequest;
use ssync_wire::{InventoryLine, LineChannel, Method, Subrequest, WireError};

use crate::config::EngineConfig;
use crate::error::{NegotiationError, SyncError};
use crate::resource::{DeviceLocks, ReplicationPermits};
use crate::session::{parse_path, validate_headers, SessionContext, SyncRequest};

/// What one receiver session did, whether or not it completed cleanly.
#[derive(Debug)]
pub struct ReceiverReport {
    /// Session id, matches the log events.
    pub session_id: Uuid,
    /// Device the session addressed.
    pub device: String,
    /// Partition the session addressed.
    pub partition: String,
    /// Hashes echoed back as wanted during missing-check.
    pub wanted: usize,
    /// Subrequests applied successfully.
    pub successes: u64,
    /// Subrequests that failed at the store.
    pub failures: u64,
    /// The in-band failure that ended the session, if any.
    pub error: Option<SyncError>,
}

impl ReceiverReport {
    /// Whether the session ran the full protocol without an in-band error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The receiver protocol engine.
pub struct Receiver<St> {
    store: Arc<St>,
    registry: Arc<PolicyRegistry>,
    config: EngineConfig,
    permits: ReplicationPermits,
    locks: DeviceLocks,
}

impl<St: ObjectStore> Receiver<St> {
    /// A receiver over `store` with the node's configured policies.
    pub fn new(store: Arc<St>, registry: Arc<PolicyRegistry>, config: EngineConfig) -> Self {
        let permits = ReplicationPermits::new(config.replication_concurrency);
        let locks = DeviceLocks::new(config.lock_root.clone(), config.lock_timeout());
        Self {
            store,
            registry,
            config,
            permits,
            locks,
        }
    }

    /// The device lock table, shared with any other replication activity
    /// that must serialize on a device.
    pub fn device_locks(&self) -> &DeviceLocks {
        &self.locks
    }

    /// Run one inbound session over `stream`.
    ///
    /// A `NegotiationError` maps to the outer non-200 response and means no
    /// phase ran. Everything later — including in-band `:ERROR:` outcomes —
    /// returns `Ok` with the failure recorded in the report.
    pub async fn handle<S>(
        &self,
        req: SyncRequest,
        stream: S,
    ) -> Result<ReceiverReport, NegotiationError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let (device, partition) = parse_path(&req.path)?;
        let _permit = self.permits.try_acquire().ok_or(NegotiationError::Busy)?;
        let (policy, frag_index, node_index) = validate_headers(&req.headers, &self.registry)?;
        if self.store.requires_mount_check() && !self.store.device_available(&device).await {
            return Err(NegotiationError::DeviceUnavailable { device });
        }

        let ctx = SessionContext {
            session_id: Uuid::new_v4(),
            device,
            partition,
            policy,
            frag_index,
            node_index,
            remote_addr: req.remote_addr,
        };
        debug!(session = %ctx.session_id, policy = ctx.policy.index, "{} ssync session start", ctx.log_prefix());

        let mut chan = LineChannel::new(
            stream,
            self.config.client_timeout(),
            self.config.network_chunk_size,
        );
        let mut report = ReceiverReport {
            session_id: ctx.session_id,
            device: ctx.device.clone(),
            partition: ctx.partition.clone(),
            wanted: 0,
            successes: 0,
            failures: 0,
            error: None,
        };

        match self.run(&ctx, &mut chan, &mut report).await {
            Ok(()) => {
                info!(
                    session = %ctx.session_id,
                    wanted = report.wanted,
                    successes = report.successes,
                    "{} ssync session complete",
                    ctx.log_prefix()
                );
            }
            Err(err) => {
                self.log_failure(&ctx, &err);
                let line = err.to_error_line().render();
                if chan.write_line(&line).await.is_err() || chan.flush().await.is_err() {
                    // best effort: the failure is already logged above
                    warn!(session = %ctx.session_id, "{} could not deliver error line to peer", ctx.log_prefix());
                }
                if err.is_hard() {
                    chan.shutdown().await;
                }
                report.error = Some(err);
            }
        }
        Ok(report)
    }

    fn log_failure(&self, ctx: &SessionContext, err: &SyncError) {
        match err {
            SyncError::LockTimeout { .. } => {
                debug!(session = %ctx.session_id, "{} ssync lock timeout: {}", ctx.log_prefix(), err);
            }
            SyncError::Timeout { .. } => {
                error!(session = %ctx.session_id, "{} timeout in ssync receiver: {}", ctx.log_prefix(), err);
            }
            SyncError::UpdateFailures { .. } => {
                warn!(session = %ctx.session_id, "{} ssync update phase had failures: {}", ctx.log_prefix(), err);
            }
            _ => {
                error!(session = %ctx.session_id, "{} error in ssync receiver: {}", ctx.log_prefix(), err);
            }
        }
    }

    async fn run<S>(
        &self,
        ctx: &SessionContext,
        chan: &mut LineChannel<S>,
        report: &mut ReceiverReport,
    ) -> Result<(), SyncError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let _device_lock = self.locks.acquire(&ctx.device).await?;
        report.wanted = self.missing_check(ctx, chan).await?;
        self.updates(ctx, chan, report).await
    }

    /// Read the sender's advertised inventory, decide which hashes are
    /// wanted, and reply with the bracketed wanted list. The reply is
    /// written only once the whole input section has been consumed.
    async fn missing_check<S>(
        &self,
        ctx: &SessionContext,
        chan: &mut LineChannel<S>,
    ) -> Result<usize, SyncError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let opener = chan
            .read_line("missing_check start")
            .await?
            .unwrap_or_default();
        if opener.trim() != MISSING_CHECK_START {
            return Err(SyncError::Protocol {
                msg: format!(
                    "Looking for {} got {:?}",
                    MISSING_CHECK_START,
                    truncate(&opener, 1024)
                ),
            });
        }

        let part = PartitionRef::new(
            ctx.device.clone(),
            ctx.partition.clone(),
            ctx.policy.index,
        );
        let frag_index = ctx.store_frag_index();
        let mut wanted = Vec::new();
        loop {
            let Some(line) = chan.read_line("missing_check line").await? else {
                break;
            };
            let line = line.trim();
            if line == MISSING_CHECK_END {
                break;
            }
            let Some(inv) = InventoryLine::parse(line) else {
                return Err(SyncError::Protocol {
                    msg: format!("invalid missing_check line {:?}", truncate(line, 1024)),
                });
            };
            let advertised: Timestamp = inv.timestamp.parse()?;
            let local = self
                .store
                .newest_timestamp(&part, frag_index, &inv.hash)
                .await?;
            // wanted iff absent locally or strictly older than advertised
            if local.map_or(true, |held| held < advertised) {
                wanted.push(inv.hash);
            }
        }

        chan.write_line(MISSING_CHECK_START).await?;
        for hash in &wanted {
            chan.write_line(hash).await?;
        }
        chan.write_line(MISSING_CHECK_END).await?;
        chan.flush().await?;
        Ok(wanted.len())
    }

    /// Parse and apply the update subrequest stream, enforcing the failure
    /// circuit breaker. The phase markers are acknowledged only on a
    /// zero-failure completion; any failure outcome suppresses them and is
    /// reported as an `:ERROR:` line instead.
    async fn updates<S>(
        &self,
        ctx: &SessionContext,
        chan: &mut LineChannel<S>,
        report: &mut ReceiverReport,
    ) -> Result<(), SyncError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let opener = chan.read_line("updates start").await?.unwrap_or_default();
        if opener.trim() != UPDATES_START {
            return Err(SyncError::Protocol {
                msg: format!(
                    "Looking for {} got {:?}",
                    UPDATES_START,
                    truncate(&opener, 1024)
                ),
            });
        }

        let threshold = self.config.replication_failure_threshold;
        let ratio = self.config.replication_failure_ratio;
        while let Some(raw) = read_subrequest(chan).await.map_err(SyncError::from)? {
            let method = match raw.method.as_str() {
                "PUT" => {
                    if raw.content_length.is_none() {
                        return Err(SyncError::NoContentLength { path: raw.path });
                    }
                    Method::Put
                }
                "DELETE" => {
                    if raw.content_length.is_some() {
                        return Err(SyncError::DeleteWithContentLength { path: raw.path });
                    }
                    Method::Delete
                }
                _ => {
                    // position the stream at the next subrequest before failing
                    if let Some(len) = raw.content_length {
                        chan.body(len)
                            .drain()
                            .await
                            .map_err(|e| body_error(e, &raw.method, &raw.path))?;
                    }
                    return Err(SyncError::InvalidMethod { method: raw.method });
                }
            };

            let manifest = raw.headers.manifest();
            let mut headers = raw.headers;
            headers.insert(POLICY_INDEX_HEADER, ctx.policy.index.to_string());
            headers.insert(REPLICATION_MARKER_HEADER, "True");
            headers.insert(REPLICATION_MANIFEST_HEADER, manifest);
            if method == Method::Put {
                if let Some(frag_index) = ctx.frag_index {
                    headers.insert(FRAG_INDEX_HEADER, frag_index.to_string());
                }
            }
            let subreq = Subrequest {
                method,
                path: format!("/{}/{}{}", ctx.device, ctx.partition, raw.path),
                headers,
            };

            let mut body = chan.body(raw.content_length.unwrap_or(0));
            let status = self
                .store
                .apply(&subreq, &mut body)
                .await
                .map_err(|e| body_error(e, &raw.method, &raw.path))?;
            // the store may not have consumed its whole body; drain the rest
            // or every following subrequest parses garbage
            body.drain()
                .await
                .map_err(|e| body_error(e, &raw.method, &raw.path))?;

            if (200..300).contains(&status) {
                report.successes += 1;
            } else {
                report.failures += 1;
                warn!(
                    session = %ctx.session_id,
                    status,
                    "{} update subrequest failed: {} {}",
                    ctx.log_prefix(),
                    raw.method,
                    raw.path
                );
                if report.failures >= threshold
                    && report.failures as f64 > ratio * report.successes as f64
                {
                    return Err(SyncError::TooManyFailures {
                        failures: report.failures,
                        successes: report.successes,
                    });
                }
            }
        }

        if report.failures > 0 {
            return Err(SyncError::UpdateFailures {
                failures: report.failures,
                successes: report.successes,
            });
        }
        chan.write_line(UPDATES_START).await?;
        chan.write_line(UPDATES_END).await?;
        chan.flush().await?;
        Ok(())
    }
}

fn body_error(err: WireError, method: &str, path: &str) -> SyncError {
    match err {
        WireError::UnexpectedEof => SyncError::EarlyTermination {
            method: method.to_string(),
            path: path.to_string(),
        },
        other => other.into(),
    }
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
