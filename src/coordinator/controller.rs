use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::chunk::{plan, propose_chunk_size, replan_pending, should_retune, ChunkStatus};
use crate::config::UploadOptions;
use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::scheduler::{run_chunk_worker, ChunkJob, WorkerContext};
use crate::coordinator::state_machine::SessionStateMachine;
use crate::coordinator::types::{Command, ProgressSnapshot, SessionEvent, WorkerEvent};
use crate::hash::{hex_digest, HashService};
use crate::net::NetworkDiagnostics;
use crate::provider::control::validate_file_info;
use crate::provider::{
    ChunkTarget, CompletedPart, FileInfo, InitializeResult, ProviderAdapter,
};
use crate::retry;
use crate::session::{FailureKind, SessionStatus, UploadFailure, UploadSession};
use crate::source::ByteSource;

const COMMAND_QUEUE: usize = 16;
const EVENT_QUEUE: usize = 64;
const INITIALIZE_ATTEMPTS: u32 = 3;
/// The tuner is only consulted once this many chunks have completed.
const TUNE_MIN_COMPLETED: usize = 5;

/// Caller-side handle to a running upload session.
///
/// Commands are fire-and-forget: the controller validates them against the
/// lifecycle and ignores inadmissible ones (cancelling a finished session
/// is a no-op). Observe outcomes through the progress watch channel.
/// Dropping every handle cancels the session.
#[derive(Clone, Debug)]
pub struct UploadHandle {
    session_id: String,
    commands: mpsc::Sender<Command>,
    progress: watch::Receiver<ProgressSnapshot>,
}

impl UploadHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Latest published snapshot.
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.borrow().clone()
    }

    /// Receiver that yields a change notification per published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.clone()
    }

    pub async fn pause(&self) -> CoordinatorResult<()> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> CoordinatorResult<()> {
        self.send(Command::Resume).await
    }

    pub async fn cancel(&self) -> CoordinatorResult<()> {
        self.send(Command::Cancel).await
    }

    /// Put permanently failed chunks back into play after a session-level
    /// failure. Completed chunks are retained.
    pub async fn retry(&self) -> CoordinatorResult<()> {
        self.send(Command::Retry).await
    }

    async fn send(&self, cmd: Command) -> CoordinatorResult<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| CoordinatorError::ControllerGone)
    }
}

/// Drives one upload session from plan through finalize.
///
/// The controller task is the sole mutator of the session record; workers
/// report back over the event channel and the semaphore bounds how many of
/// them run at once.
pub struct UploadController<A: ?Sized> {
    session: UploadSession,
    machine: SessionStateMachine,
    adapter: Arc<A>,
    source: Arc<dyn ByteSource>,
    hasher: HashService,
    diagnostics: NetworkDiagnostics,
    targets: Vec<ChunkTarget>,
    etags: HashMap<u32, String>,
    init: Option<InitializeResult>,
    cancel: CancellationToken,
    commands: mpsc::Receiver<Command>,
    commands_closed: bool,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    progress_tx: watch::Sender<ProgressSnapshot>,
    semaphore: Arc<Semaphore>,
    in_flight: usize,
    abort_sent: bool,
}

impl<A> UploadController<A>
where
    A: ProviderAdapter + ?Sized + 'static,
{
    /// Validate the request, build the session and spawn the controller
    /// task. Validation problems surface here, before anything runs.
    pub fn spawn(
        source: Arc<dyn ByteSource>,
        adapter: Arc<A>,
        hasher: HashService,
        filename: String,
        options: UploadOptions,
    ) -> CoordinatorResult<UploadHandle> {
        options.validate()?;

        let total_size = source.len();
        let chunks = plan(total_size, options.chunk_size)?;
        validate_file_info(&FileInfo {
            filename: filename.clone(),
            total_size,
            file_hash: None,
            chunk_count: chunks.len() as u32,
            mime_type: options.mime_type.clone(),
        })
        .map_err(|e| CoordinatorError::Validation(e.to_string()))?;

        let concurrency = options.concurrency;
        let session = UploadSession::new(filename, total_size, chunks, &options);
        let session_id = session.session_id.clone();

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (progress_tx, progress_rx) = watch::channel(snapshot_of(&session));

        let controller = Self {
            session,
            machine: SessionStateMachine::new(),
            adapter,
            source,
            hasher,
            diagnostics: NetworkDiagnostics::new(),
            targets: Vec::new(),
            etags: HashMap::new(),
            init: None,
            cancel: CancellationToken::new(),
            commands: commands_rx,
            commands_closed: false,
            events_tx,
            events_rx,
            progress_tx,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            in_flight: 0,
            abort_sent: false,
        };

        tokio::spawn(controller.run());

        Ok(UploadHandle {
            session_id,
            commands: commands_tx,
            progress: progress_rx,
        })
    }

    async fn run(mut self) {
        tracing::info!(
            session = %self.session.session_id,
            file = %self.session.filename,
            size = self.session.total_size,
            provider = %self.session.provider_kind,
            chunks = self.session.n_chunks(),
            "upload session starting"
        );

        if self.apply(SessionEvent::Start).is_err() {
            return;
        }
        self.session.mark_started();
        self.publish();

        self.compute_file_hash().await;
        if !self.session.status.is_terminal() {
            self.initialize().await;
        }
        self.publish();

        self.event_loop().await;

        tracing::info!(
            session = %self.session.session_id,
            status = ?self.session.status,
            bytes = self.session.bytes_done,
            "upload session finished"
        );
    }

    /// Whole-file digest, computed before initialize so the provider can
    /// dedup on it. Routed to this session by construction: the reply
    /// travels on a oneshot only this controller holds.
    async fn compute_file_hash(&mut self) {
        for attempt in 1..=INITIALIZE_ATTEMPTS {
            let hasher = self.hasher.clone();
            let source = self.source.clone();
            let fut = async move { hasher.hash_file(source).await };
            tokio::pin!(fut);

            let result = loop {
                tokio::select! {
                    r = &mut fut => break r,
                    cmd = self.commands.recv(), if !self.commands_closed => {
                        self.handle_phase_command(cmd).await;
                        if self.session.status.is_terminal() {
                            return;
                        }
                    }
                }
            };

            match result {
                Ok(digest) => {
                    self.session.file_hash = Some(digest);
                    return;
                }
                Err(err) if attempt < INITIALIZE_ATTEMPTS => {
                    tracing::warn!(attempt, %err, "file hash failed, retrying");
                    tokio::time::sleep(retry::backoff_delay(attempt - 1)).await;
                }
                Err(err) => {
                    self.fatal(FailureKind::Initialize, format!("file hash failed: {err}"), None);
                    return;
                }
            }
        }
    }

    async fn initialize(&mut self) {
        for attempt in 1..=INITIALIZE_ATTEMPTS {
            let adapter = self.adapter.clone();
            let info = self.file_info();
            let fut = async move { adapter.initialize(&info).await };
            tokio::pin!(fut);

            let result = loop {
                tokio::select! {
                    r = &mut fut => break r,
                    cmd = self.commands.recv(), if !self.commands_closed => {
                        self.handle_phase_command(cmd).await;
                        if self.session.status.is_terminal() {
                            return;
                        }
                    }
                }
            };

            match result {
                Ok(init) => {
                    self.session.upload_id = Some(init.upload_id.clone());
                    self.targets = init.targets.clone();
                    self.init = Some(init);
                    tracing::debug!(
                        session = %self.session.session_id,
                        upload_id = ?self.session.upload_id,
                        "provider session initialized"
                    );
                    return;
                }
                Err(err) if attempt < INITIALIZE_ATTEMPTS && err.is_retryable() => {
                    tracing::warn!(attempt, %err, "initialize failed, retrying");
                    tokio::time::sleep(retry::backoff_delay(attempt - 1)).await;
                }
                Err(err) => {
                    self.fatal(FailureKind::Initialize, err.to_string(), None);
                    return;
                }
            }
        }
    }

    async fn event_loop(&mut self) {
        loop {
            self.dispatch();
            // A Failed session stays resident while handles exist: retry is
            // an admissible transition out of it. Completed and Cancelled
            // are final.
            if self.in_flight == 0 {
                let status = self.session.status;
                let finished = matches!(
                    status,
                    SessionStatus::Completed | SessionStatus::Cancelled
                ) || (self.commands_closed && status.is_terminal());
                if finished {
                    break;
                }
            }

            tokio::select! {
                cmd = self.commands.recv(), if !self.commands_closed => {
                    self.handle_command(cmd).await;
                }
                Some(ev) = self.events_rx.recv() => {
                    self.handle_event(ev).await;
                }
            }
        }
    }

    /// Spawn workers for pending chunks while permits are immediately
    /// available. Never runs outside Uploading, so pause stops new
    /// dispatches without touching in-flight work.
    fn dispatch(&mut self) {
        if self.session.status != SessionStatus::Uploading {
            return;
        }

        while let Some(idx) = self
            .session
            .chunks
            .iter()
            .position(|c| c.status == ChunkStatus::Pending)
        {
            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => break,
            };

            let chunk = &mut self.session.chunks[idx];
            chunk.status = ChunkStatus::Uploading;
            let job = ChunkJob {
                index: chunk.index,
                start: chunk.start,
                end: chunk.end,
                total_size: self.session.total_size,
                hash: chunk.hash,
                target: self.targets[idx].clone(),
            };
            let ctx = WorkerContext {
                source: self.source.clone(),
                adapter: self.adapter.clone(),
                hasher: self.hasher.clone(),
                events: self.events_tx.clone(),
                cancel: self.cancel.clone(),
            };

            self.in_flight += 1;
            tokio::spawn(run_chunk_worker(ctx, job, permit));
        }
    }

    async fn handle_command(&mut self, cmd: Option<Command>) {
        let Some(cmd) = cmd else {
            // Every handle is gone; nobody can drive this session anymore.
            self.commands_closed = true;
            if !self.session.status.is_terminal() {
                tracing::debug!(session = %self.session.session_id, "all handles dropped, cancelling");
                self.do_cancel().await;
            }
            return;
        };

        match cmd {
            Command::Pause => {
                if self.session.status.is_active() && self.apply(SessionEvent::Pause).is_ok() {
                    tracing::info!(session = %self.session.session_id, "paused");
                    self.publish();
                } else {
                    tracing::debug!(status = ?self.session.status, "ignoring pause");
                }
            }
            Command::Resume => {
                if self.session.status.is_paused() && self.apply(SessionEvent::Resume).is_ok() {
                    tracing::info!(session = %self.session.session_id, "resumed");
                    self.publish();
                    if self.session.is_complete() {
                        self.finalize().await;
                    } else {
                        self.check_stalled();
                    }
                }
            }
            Command::Cancel => {
                // Cancelling a terminal session is a no-op: no state change
                // and no abort call.
                if !self.session.status.is_terminal() {
                    self.do_cancel().await;
                }
            }
            Command::Retry => {
                if self.session.status == SessionStatus::Failed
                    && self.apply(SessionEvent::Retry).is_ok()
                {
                    self.session.reset_failed();
                    self.session.ended_at = None;
                    tracing::info!(session = %self.session.session_id, "retrying failed chunks");
                    self.publish();

                    // A session that failed before initialize succeeded has
                    // no targets yet; redo the setup phases first.
                    if self.init.is_none() {
                        if self.session.file_hash.is_none() {
                            self.compute_file_hash().await;
                        }
                        if !self.session.status.is_terminal() {
                            self.initialize().await;
                        }
                        self.publish();
                    }
                }
            }
        }
    }

    /// Reduced command handling for the setup phases (file hash and
    /// initialize), where retry is never admissible and dispatch has not
    /// started.
    async fn handle_phase_command(&mut self, cmd: Option<Command>) {
        match cmd {
            None => {
                self.commands_closed = true;
                if !self.session.status.is_terminal() {
                    tracing::debug!(session = %self.session.session_id, "all handles dropped, cancelling");
                    self.do_cancel().await;
                }
            }
            Some(Command::Pause) => {
                if self.session.status.is_active() && self.apply(SessionEvent::Pause).is_ok() {
                    self.publish();
                }
            }
            Some(Command::Resume) => {
                if self.session.status.is_paused() && self.apply(SessionEvent::Resume).is_ok() {
                    self.publish();
                }
            }
            Some(Command::Cancel) => {
                if !self.session.status.is_terminal() {
                    self.do_cancel().await;
                }
            }
            Some(Command::Retry) => {
                tracing::debug!("ignoring retry while the session is being prepared");
            }
        }
    }

    async fn handle_event(&mut self, ev: WorkerEvent) {
        match ev {
            WorkerEvent::Completed {
                index,
                attempts,
                etag,
                sample,
            } => {
                self.in_flight -= 1;
                self.session.mark_completed(index, attempts);
                if let Some(etag) = etag {
                    self.etags.insert(index, etag);
                }
                self.diagnostics.record(sample);
                tracing::debug!(
                    session = %self.session.session_id,
                    chunk = index,
                    attempts,
                    done = self.session.completed.len(),
                    total = self.session.n_chunks(),
                    "chunk completed"
                );
                self.maybe_retune();
                self.publish();

                if self.session.is_complete() && self.session.status.is_active() {
                    self.finalize().await;
                }
            }
            WorkerEvent::Failed {
                index,
                attempts,
                error,
            } => {
                self.in_flight -= 1;
                tracing::warn!(
                    session = %self.session.session_id,
                    chunk = index,
                    attempts,
                    %error,
                    "chunk permanently failed"
                );
                self.session.mark_failed(index, attempts);

                if self.session.threshold_tripped() {
                    self.fatal(
                        FailureKind::Threshold,
                        "too many chunk failures",
                        Some(index),
                    );
                } else {
                    self.check_stalled();
                }
                self.publish();
            }
            WorkerEvent::Aborted { index } => {
                self.in_flight -= 1;
                if let Some(chunk) = self.session.chunks.get_mut(index as usize) {
                    if chunk.status == ChunkStatus::Uploading {
                        chunk.status = ChunkStatus::Pending;
                    }
                }
                self.publish();
            }
        }
    }

    /// Below the threshold a failed chunk waits for a manual retry, but a
    /// session with no dispatchable work left cannot make progress: once
    /// nothing is pending or in flight and failures remain, escalate so
    /// retry becomes admissible.
    fn check_stalled(&mut self) {
        if self.session.status != SessionStatus::Uploading
            || self.in_flight > 0
            || self.session.is_complete()
            || self.session.failed.is_empty()
        {
            return;
        }
        let pending = self
            .session
            .chunks
            .iter()
            .any(|c| c.status == ChunkStatus::Pending);
        if pending {
            return;
        }

        let first = self.session.failed.iter().min().copied();
        self.fatal(
            FailureKind::Transport,
            format!("{} chunk(s) failed permanently", self.session.failed.len()),
            first,
        );
    }

    async fn do_cancel(&mut self) {
        if self.apply(SessionEvent::Cancel).is_err() {
            return;
        }
        self.session.error = Some(UploadFailure::new(FailureKind::Cancelled, "cancelled by user"));
        self.session.mark_ended();
        self.cancel.cancel();
        tracing::info!(session = %self.session.session_id, "cancelled");

        if let Some(upload_id) = self.session.upload_id.clone() {
            if !self.abort_sent {
                self.abort_sent = true;
                if let Err(err) = self.adapter.abort(&upload_id).await {
                    tracing::warn!(%err, "abort failed (best effort)");
                }
            }
        }
        self.publish();
    }

    async fn finalize(&mut self) {
        let Some(upload_id) = self.session.upload_id.clone() else {
            self.fatal(FailureKind::Finalize, "session was never initialized", None);
            return;
        };
        let parts = self.completed_parts();

        let mut result = self.adapter.finalize(&upload_id, parts.clone()).await;
        if let Err(err) = &result {
            tracing::warn!(%err, "finalize failed, retrying once");
            tokio::select! {
                _ = tokio::time::sleep(retry::backoff_delay(0)) => {}
                _ = self.cancel.cancelled() => return,
            }
            result = self.adapter.finalize(&upload_id, parts).await;
        }

        match result {
            Ok(done) => {
                if self.apply(SessionEvent::Complete).is_ok() {
                    self.session.final_location = Some(done.final_url);
                    self.session.mark_ended();
                    tracing::info!(
                        session = %self.session.session_id,
                        url = ?self.session.final_location,
                        "upload completed"
                    );
                    self.publish();
                }
            }
            Err(err) => {
                self.fatal(FailureKind::Finalize, err.to_string(), None);
                self.publish();
            }
        }
    }

    /// Consult the tuner and rebuild the untouched tail of the plan when
    /// the proposal moves far enough and the provider can re-fan targets.
    fn maybe_retune(&mut self) {
        if !self.session.auto_tune || self.session.completed.len() <= TUNE_MIN_COMPLETED {
            return;
        }

        let snap = self.diagnostics.snapshot();
        let proposed = propose_chunk_size(
            snap.mean_speed_bps,
            snap.mean_latency_ms,
            self.session.total_size,
        );
        if !should_retune(self.session.chunk_size, proposed) {
            return;
        }
        let Some(init) = &self.init else { return };

        let mut trial = self.session.chunks.clone();
        match replan_pending(&mut trial, proposed) {
            Ok(true) => {}
            _ => return,
        }
        let Some(targets) = self.adapter.targets_for(init, trial.len()) else {
            // Fixed per-part targets (S3) cannot absorb a different chunk
            // count; keep the plan that the presigned URLs were issued for.
            tracing::debug!("provider targets are fixed, keeping current plan");
            return;
        };

        tracing::info!(
            session = %self.session.session_id,
            from = self.session.chunk_size,
            to = proposed,
            chunks = trial.len(),
            "retuned chunk size"
        );
        self.session.chunks = trial;
        self.session.chunk_size = proposed;
        self.targets = targets;
    }

    /// Parts list for CompleteMultipartUpload, 1-based and ascending.
    fn completed_parts(&self) -> Vec<CompletedPart> {
        let mut parts: Vec<CompletedPart> = self
            .etags
            .iter()
            .map(|(index, etag)| CompletedPart {
                part_number: *index + 1,
                etag: etag.clone(),
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    fn file_info(&self) -> FileInfo {
        FileInfo {
            filename: self.session.filename.clone(),
            total_size: self.session.total_size,
            file_hash: self.session.file_hash.as_ref().map(hex_digest),
            chunk_count: self.session.n_chunks(),
            mime_type: self.session.mime_type.clone(),
        }
    }

    fn fatal(&mut self, kind: FailureKind, message: impl Into<String>, chunk: Option<u32>) {
        if self.apply(SessionEvent::Fatal).is_err() {
            return;
        }
        let failure = match chunk {
            Some(index) => UploadFailure::for_chunk(kind, message, index),
            None => UploadFailure::new(kind, message),
        };
        tracing::error!(session = %self.session.session_id, %failure, "upload failed");
        self.session.error = Some(failure);
        self.session.mark_ended();
    }

    fn apply(&mut self, event: SessionEvent) -> CoordinatorResult<()> {
        let next = self.machine.transition(event)?;
        self.session.status = next;
        Ok(())
    }

    fn publish(&self) {
        let _ = self.progress_tx.send(snapshot_of(&self.session));
    }
}

fn snapshot_of(session: &UploadSession) -> ProgressSnapshot {
    ProgressSnapshot {
        session_id: session.session_id.clone(),
        status: session.status,
        total_size: session.total_size,
        bytes_done: session.bytes_done,
        progress_percent: session.progress_percent(),
        completed_chunks: session.completed.len() as u32,
        failed_chunks: session.failed.len() as u32,
        total_chunks: session.n_chunks(),
        chunk_size: session.chunk_size,
        speed_bps: session.speed_bps(),
        eta: session.eta(),
        final_location: session.final_location.clone(),
        error: session.error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ProviderKind};
    use crate::source::MemorySource;
    use async_trait::async_trait;
    use bytes::Bytes;
    use crate::provider::{ChunkMeta, ChunkReceipt, FinalizeResult};

    struct RejectingAdapter;

    #[async_trait]
    impl ProviderAdapter for RejectingAdapter {
        async fn initialize(&self, _info: &FileInfo) -> crate::provider::Result<InitializeResult> {
            Err(ProviderError::Validation("nope".into()))
        }
        async fn upload_chunk(
            &self,
            _bytes: Bytes,
            _target: &ChunkTarget,
            _meta: &ChunkMeta,
            _cancel: &CancellationToken,
        ) -> crate::provider::Result<ChunkReceipt> {
            Err(ProviderError::Validation("nope".into()))
        }
        async fn finalize(
            &self,
            _upload_id: &str,
            _parts: Vec<CompletedPart>,
        ) -> crate::provider::Result<FinalizeResult> {
            Err(ProviderError::Validation("nope".into()))
        }
        async fn abort(&self, _upload_id: &str) -> crate::provider::Result<()> {
            Ok(())
        }
    }

    fn spawn_with(
        data: Vec<u8>,
        filename: &str,
        options: UploadOptions,
    ) -> CoordinatorResult<UploadHandle> {
        UploadController::spawn(
            Arc::new(MemorySource::new(data)),
            Arc::new(RejectingAdapter),
            HashService::spawn(),
            filename.to_string(),
            options,
        )
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_chunk_size() {
        let mut options = UploadOptions::new(ProviderKind::S3);
        options.chunk_size = 12345;
        let err = spawn_with(vec![0u8; 64], "a.bin", options).unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
    }

    #[tokio::test]
    async fn test_spawn_rejects_empty_filename() {
        let options = UploadOptions::new(ProviderKind::S3);
        let err = spawn_with(vec![0u8; 64], "", options).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_spawn_rejects_excess_concurrency() {
        let mut options = UploadOptions::new(ProviderKind::S3);
        options.concurrency = 99;
        let err = spawn_with(vec![0u8; 64], "a.bin", options).unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
    }

    #[tokio::test]
    async fn test_failed_initialize_fails_session() {
        let options = UploadOptions::new(ProviderKind::S3);
        let handle = spawn_with(vec![0u8; 1024], "a.bin", options).unwrap();

        let mut progress = handle.subscribe();
        loop {
            progress.changed().await.unwrap();
            let snap = progress.borrow().clone();
            if snap.status.is_terminal() {
                assert_eq!(snap.status, SessionStatus::Failed);
                let error = snap.error.unwrap();
                assert_eq!(error.kind, FailureKind::Initialize);
                break;
            }
        }
    }

    #[test]
    fn test_snapshot_reflects_session() {
        let options = UploadOptions::new(ProviderKind::Gcs);
        let chunks = plan(3 * 1024 * 1024, 1024 * 1024).unwrap();
        let mut session = UploadSession::new("x.bin".into(), 3 * 1024 * 1024, chunks, &options);
        session.mark_completed(0, 1);

        let snap = snapshot_of(&session);
        assert_eq!(snap.completed_chunks, 1);
        assert_eq!(snap.total_chunks, 3);
        assert_eq!(snap.bytes_done, 1024 * 1024);
        assert!((snap.progress_percent - 100.0 / 3.0).abs() < 0.01);
    }
}
