//! Scripted provider adapter for end-to-end engine tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use chunklift::coordinator::{ProgressSnapshot, UploadHandle};
use chunklift::provider::{
    ChunkMeta, ChunkReceipt, ChunkTarget, CompletedPart, FileInfo, FinalizeResult,
    InitializeResult, ProviderAdapter, ProviderError,
};

pub const MIB: u64 = 1024 * 1024;

/// Scripted outcome for one PUT attempt; queues drain front-to-back and an
/// empty queue means success.
#[derive(Debug, Clone)]
pub enum PutScript {
    Ok,
    Status(u16),
    Transport,
    Incomplete(u64),
}

#[derive(Debug, Clone)]
pub struct PutRecord {
    pub index: u32,
    pub start: u64,
    pub end: u64,
    pub len: usize,
    pub url: String,
    pub at: tokio::time::Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockKind {
    S3,
    Resumable,
}

pub struct MockAdapter {
    pub kind: MockKind,
    /// Chunk size the plan was built with; used to attribute a PUT to its
    /// chunk index from the range metadata.
    pub chunk_size: u64,
    /// Simulated transfer time per PUT.
    pub put_delay: Duration,
    scripts: Mutex<HashMap<u32, VecDeque<PutScript>>>,
    initialize_failures: Mutex<u32>,
    initialize_attempts: Mutex<u32>,
    finalize_failures: Mutex<u32>,
    pub puts: Mutex<Vec<PutRecord>>,
    pub finalize_calls: Mutex<Vec<Vec<CompletedPart>>>,
    pub abort_calls: Mutex<Vec<String>>,
    in_flight: Mutex<usize>,
    max_in_flight: Mutex<usize>,
}

/// Decrements the in-flight gauge even when a PUT unwinds on cancellation.
struct InFlightGuard<'a>(&'a MockAdapter);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.0.in_flight.lock() -= 1;
    }
}

impl MockAdapter {
    pub fn s3(chunk_size: u64) -> Self {
        Self::new(MockKind::S3, chunk_size)
    }

    pub fn resumable(chunk_size: u64) -> Self {
        Self::new(MockKind::Resumable, chunk_size)
    }

    fn new(kind: MockKind, chunk_size: u64) -> Self {
        Self {
            kind,
            chunk_size,
            put_delay: Duration::ZERO,
            scripts: Mutex::new(HashMap::new()),
            initialize_failures: Mutex::new(0),
            initialize_attempts: Mutex::new(0),
            finalize_failures: Mutex::new(0),
            puts: Mutex::new(Vec::new()),
            finalize_calls: Mutex::new(Vec::new()),
            abort_calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new(0),
            max_in_flight: Mutex::new(0),
        }
    }

    /// Largest number of PUTs observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        *self.max_in_flight.lock()
    }

    pub fn script(&self, index: u32, outcomes: impl IntoIterator<Item = PutScript>) {
        self.scripts
            .lock()
            .entry(index)
            .or_default()
            .extend(outcomes);
    }

    pub fn fail_initialize_times(&self, times: u32) {
        *self.initialize_failures.lock() = times;
    }

    pub fn fail_finalize_times(&self, times: u32) {
        *self.finalize_failures.lock() = times;
    }

    pub fn initialize_attempts(&self) -> u32 {
        *self.initialize_attempts.lock()
    }

    pub fn puts_for(&self, index: u32) -> Vec<PutRecord> {
        self.puts
            .lock()
            .iter()
            .filter(|p| p.index == index)
            .cloned()
            .collect()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().len()
    }

    fn index_of(&self, meta: &ChunkMeta) -> u32 {
        (meta.end.saturating_sub(1) / self.chunk_size) as u32
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    async fn initialize(&self, info: &FileInfo) -> chunklift::provider::Result<InitializeResult> {
        *self.initialize_attempts.lock() += 1;
        {
            let mut failures = self.initialize_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ProviderError::Status {
                    status: 503,
                    message: "scripted initialize failure".into(),
                });
            }
        }

        match self.kind {
            MockKind::S3 => Ok(InitializeResult {
                upload_id: "mock-upload".into(),
                object_key: Some(format!("objects/{}", info.filename)),
                targets: (0..info.chunk_count)
                    .map(|i| ChunkTarget::put(format!("mock://part/{i}")))
                    .collect(),
                resumable_url: None,
            }),
            MockKind::Resumable => Ok(InitializeResult {
                upload_id: "mock-upload".into(),
                object_key: None,
                targets: vec![ChunkTarget::put("mock://session"); info.chunk_count as usize],
                resumable_url: Some("mock://session".into()),
            }),
        }
    }

    async fn upload_chunk(
        &self,
        bytes: Bytes,
        target: &ChunkTarget,
        meta: &ChunkMeta,
        cancel: &CancellationToken,
    ) -> chunklift::provider::Result<ChunkReceipt> {
        {
            let mut in_flight = self.in_flight.lock();
            *in_flight += 1;
            let mut max = self.max_in_flight.lock();
            *max = (*max).max(*in_flight);
        }
        let _guard = InFlightGuard(self);

        if !self.put_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.put_delay) => {}
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            }
        }

        let index = self.index_of(meta);
        self.puts.lock().push(PutRecord {
            index,
            start: meta.start,
            end: meta.end,
            len: bytes.len(),
            url: target.url.clone(),
            at: tokio::time::Instant::now(),
        });

        let script = self.scripts.lock().get_mut(&index).and_then(|q| q.pop_front());
        match script {
            None | Some(PutScript::Ok) => Ok(ChunkReceipt {
                etag: (self.kind == MockKind::S3).then(|| format!("e{}", index + 1)),
                latency: Some(Duration::from_millis(10)),
            }),
            Some(PutScript::Status(status)) => Err(ProviderError::Status {
                status,
                message: "scripted failure".into(),
            }),
            Some(PutScript::Transport) => Err(ProviderError::Transport("scripted failure".into())),
            Some(PutScript::Incomplete(next_offset)) => {
                Err(ProviderError::Incomplete { next_offset })
            }
        }
    }

    async fn finalize(
        &self,
        _upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> chunklift::provider::Result<FinalizeResult> {
        self.finalize_calls.lock().push(parts);
        {
            let mut failures = self.finalize_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ProviderError::Status {
                    status: 500,
                    message: "scripted finalize failure".into(),
                });
            }
        }
        Ok(FinalizeResult {
            final_url: "mock://final/object".into(),
        })
    }

    async fn abort(&self, upload_id: &str) -> chunklift::provider::Result<()> {
        self.abort_calls.lock().push(upload_id.to_string());
        Ok(())
    }
}

/// Drive the watch channel until the session reaches a terminal state.
pub async fn wait_for_terminal(handle: &UploadHandle) -> ProgressSnapshot {
    let mut rx = handle.subscribe();
    loop {
        let snap = rx.borrow().clone();
        if snap.status.is_terminal() {
            return snap;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

/// Drive the watch channel until `pred` holds for a snapshot.
pub async fn wait_until(
    handle: &UploadHandle,
    mut pred: impl FnMut(&ProgressSnapshot) -> bool,
) -> ProgressSnapshot {
    let mut rx = handle.subscribe();
    loop {
        let snap = rx.borrow().clone();
        if pred(&snap) {
            return snap;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}
