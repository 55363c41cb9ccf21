//! Scripted-session helpers shared across the scenario tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use ssync_engine::{EngineConfig, NegotiationError, Receiver, ReceiverReport, SyncRequest};
use ssync_store::{ObjectKey, ObjectStore, PartitionRef, StoredObject, Timestamp};
use ssync_wire::{BodyRead, Method, Subrequest, WireError};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Engine config used by scenario tests: production defaults except a read
/// timeout short enough to bound a hung test.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        client_timeout_secs: 5.0,
        ..EngineConfig::default()
    }
}

/// Split a session transcript into its non-blank lines, trimmed.
pub fn body_lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split('\n')
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Run one receiver session over an in-process stream: write `input`, signal
/// end of input, and collect the receiver's full reply transcript.
pub async fn run_session<St: ObjectStore>(
    rx: &Receiver<St>,
    req: SyncRequest,
    input: &[u8],
) -> (Result<ReceiverReport, NegotiationError>, Vec<String>) {
    run_session_opts(rx, req, input, true).await
}

/// As [`run_session`], but optionally keep the input side open so read
/// timeouts can be exercised.
pub async fn run_session_opts<St: ObjectStore>(
    rx: &Receiver<St>,
    req: SyncRequest,
    input: &[u8],
    send_eof: bool,
) -> (Result<ReceiverReport, NegotiationError>, Vec<String>) {
    let (mut client, server) = tokio::io::duplex(1 << 20);
    client.write_all(input).await.unwrap();
    if send_eof {
        client.shutdown().await.unwrap();
    }
    let result = rx.handle(req, server).await;
    let mut raw = Vec::new();
    client.read_to_end(&mut raw).await.unwrap();
    (result, body_lines(&raw))
}

/// One dispatched subrequest as the recording store saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Dispatched method.
    pub method: String,
    /// Dispatched (rewritten) path.
    pub path: String,
    /// Full header set in dispatch order.
    pub headers: Vec<(String, String)>,
    /// Body bytes the store chose to read.
    pub body: Vec<u8>,
}

impl RecordedCall {
    /// Value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// How the recording store responds to dispatched subrequests.
pub enum ApplyMode {
    /// Read the whole body, succeed (201 for PUT, 204 for DELETE).
    Apply,
    /// Read the whole body; fail with 500 when the path contains the needle.
    FailContaining(String),
    /// Read at most one body chunk, then fail with 500.
    PartialReadThenFail,
}

/// An [`ObjectStore`] that records every dispatch and holds no objects.
pub struct RecordingStore {
    mode: ApplyMode,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingStore {
    /// A store with the given apply behavior.
    pub fn new(mode: ApplyMode) -> Self {
        Self {
            mode,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All dispatches so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn device_available(&self, _device: &str) -> bool {
        true
    }

    async fn newest_timestamp(
        &self,
        _part: &PartitionRef,
        _frag_index: Option<u32>,
        _object_hash: &str,
    ) -> Result<Option<Timestamp>, ssync_store::StoreError> {
        Ok(None)
    }

    async fn inventory(
        &self,
        _part: &PartitionRef,
        _frag_index: Option<u32>,
    ) -> Result<Vec<ObjectKey>, ssync_store::StoreError> {
        Ok(Vec::new())
    }

    async fn load(
        &self,
        _part: &PartitionRef,
        _frag_index: Option<u32>,
        _object_hash: &str,
    ) -> Result<Option<StoredObject>, ssync_store::StoreError> {
        Ok(None)
    }

    async fn apply(
        &self,
        subreq: &Subrequest,
        body: &mut dyn BodyRead,
    ) -> Result<u16, WireError> {
        let mut call = RecordedCall {
            method: subreq.method.to_string(),
            path: subreq.path.clone(),
            headers: subreq
                .headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        };
        let ok_status = match subreq.method {
            Method::Put => 201,
            Method::Delete => 204,
        };
        let status = match &self.mode {
            ApplyMode::Apply => {
                call.body = body.read_all().await?.to_vec();
                ok_status
            }
            ApplyMode::FailContaining(needle) => {
                call.body = body.read_all().await?.to_vec();
                if subreq.path.contains(needle.as_str()) {
                    500
                } else {
                    ok_status
                }
            }
            ApplyMode::PartialReadThenFail => {
                if let Some(chunk) = body.chunk().await? {
                    call.body = chunk.to_vec();
                }
                500
            }
        };
        self.calls.lock().unwrap().push(call);
        Ok(status)
    }
}
