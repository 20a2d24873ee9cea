use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkStatus};
use crate::config::UploadOptions;
use crate::provider::ProviderKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Uploading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Uploading)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, SessionStatus::Paused)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Initialize,
    Transport,
    Threshold,
    Finalize,
    Cancelled,
}

/// User-visible failure. Transient events never reach this type; only
/// permanent outcomes do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadFailure {
    pub kind: FailureKind,
    pub message: String,
    pub chunk_index: Option<u32>,
}

impl UploadFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            chunk_index: None,
        }
    }

    pub fn for_chunk(kind: FailureKind, message: impl Into<String>, index: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            chunk_index: Some(index),
        }
    }
}

impl std::fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.chunk_index {
            Some(i) => write!(f, "{:?}: {} (chunk {i})", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// One file upload, from plan through finalize. Owned and mutated
/// exclusively by the session controller; workers only see read-only chunk
/// data and report back over channels.
#[derive(Debug)]
pub struct UploadSession {
    pub session_id: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub total_size: u64,
    pub provider_kind: ProviderKind,
    pub chunk_size: u64,
    pub concurrency: usize,
    pub auto_tune: bool,

    /// Assigned by the provider at initialize.
    pub upload_id: Option<String>,
    /// Whole-file SHA-256, populated asynchronously.
    pub file_hash: Option<[u8; 32]>,

    pub chunks: Vec<Chunk>,
    pub completed: HashSet<u32>,
    pub failed: HashSet<u32>,
    pub bytes_done: u64,

    pub status: SessionStatus,
    pub final_location: Option<String>,
    pub error: Option<UploadFailure>,

    pub created_at: i64,
    pub ended_at: Option<i64>,
    started: Option<Instant>,
}

impl UploadSession {
    pub fn new(filename: String, total_size: u64, chunks: Vec<Chunk>, options: &UploadOptions) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            filename,
            mime_type: options.mime_type.clone(),
            total_size,
            provider_kind: options.provider,
            chunk_size: options.chunk_size,
            concurrency: options.concurrency,
            auto_tune: options.auto_tune,
            upload_id: None,
            file_hash: None,
            chunks,
            completed: HashSet::new(),
            failed: HashSet::new(),
            bytes_done: 0,
            status: SessionStatus::Pending,
            final_location: None,
            error: None,
            created_at: chrono::Utc::now().timestamp(),
            ended_at: None,
            started: None,
        }
    }

    pub fn n_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn mark_started(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn mark_ended(&mut self) {
        self.ended_at = Some(chrono::Utc::now().timestamp());
    }

    pub fn mark_completed(&mut self, index: u32, attempts: u32) {
        if !self.completed.insert(index) {
            return;
        }
        self.failed.remove(&index);
        if let Some(chunk) = self.chunks.get_mut(index as usize) {
            chunk.status = ChunkStatus::Completed;
            chunk.attempts = attempts;
            self.bytes_done += chunk.size();
        }
    }

    pub fn mark_failed(&mut self, index: u32, attempts: u32) {
        if self.completed.contains(&index) {
            return;
        }
        self.failed.insert(index);
        if let Some(chunk) = self.chunks.get_mut(index as usize) {
            chunk.status = ChunkStatus::Failed;
            chunk.attempts = attempts;
        }
    }

    /// Put failed chunks back into play for a manual retry; completed
    /// chunks are retained.
    pub fn reset_failed(&mut self) {
        for index in self.failed.drain() {
            if let Some(chunk) = self.chunks.get_mut(index as usize) {
                chunk.status = ChunkStatus::Pending;
                chunk.attempts = 0;
            }
        }
        self.error = None;
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.chunks.len()
    }

    /// Permanent failures above this count escalate the whole session.
    pub fn failure_threshold(&self) -> usize {
        (self.chunks.len()).div_ceil(10)
    }

    pub fn threshold_tripped(&self) -> bool {
        self.failed.len() > self.failure_threshold()
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_size == 0 {
            return if self.is_complete() { 100.0 } else { 0.0 };
        }
        (100.0 * self.bytes_done as f64 / self.total_size as f64).clamp(0.0, 100.0)
    }

    pub fn speed_bps(&self) -> f64 {
        let Some(started) = self.started else {
            return 0.0;
        };
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / elapsed
    }

    pub fn eta(&self) -> String {
        format_eta(self.speed_bps(), self.total_size.saturating_sub(self.bytes_done))
    }
}

/// `"Ns"` under a minute, `"Nm"` under an hour, `"Nh"` beyond, and
/// `"Calculating…"` while there is no speed estimate yet.
pub fn format_eta(speed_bps: f64, remaining_bytes: u64) -> String {
    if speed_bps <= 0.0 {
        return "Calculating…".to_string();
    }
    let secs = (remaining_bytes as f64 / speed_bps).ceil() as u64;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{}h", secs / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::plan;

    const MIB: u64 = 1024 * 1024;

    fn session(total: u64, chunk_size: u64) -> UploadSession {
        let options = UploadOptions::new(ProviderKind::S3);
        let chunks = plan(total, chunk_size).unwrap();
        UploadSession::new("test.bin".into(), total, chunks, &options)
    }

    #[test]
    fn test_progress_tracks_completed_bytes() {
        let mut s = session(5 * MIB, MIB);
        assert_eq!(s.progress_percent(), 0.0);

        s.mark_completed(0, 1);
        s.mark_completed(3, 1);
        assert_eq!(s.bytes_done, 2 * MIB);
        assert!((s.progress_percent() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let mut s = session(2 * MIB, MIB);
        s.mark_completed(0, 1);
        s.mark_completed(0, 1);
        assert_eq!(s.bytes_done, MIB);
        assert_eq!(s.completed.len(), 1);
    }

    #[test]
    fn test_completed_and_failed_stay_disjoint() {
        let mut s = session(3 * MIB, MIB);
        s.mark_failed(1, 5);
        assert!(s.failed.contains(&1));

        // A later success supersedes the failure.
        s.mark_completed(1, 6);
        assert!(s.completed.contains(&1));
        assert!(!s.failed.contains(&1));

        // A failure never displaces a recorded success.
        s.mark_failed(1, 7);
        assert!(s.completed.contains(&1));
        assert!(!s.failed.contains(&1));
    }

    #[test]
    fn test_failure_threshold() {
        // ⌈0.1 · 10⌉ = 1: two permanent failures trip the threshold.
        let mut s = session(10 * MIB, MIB);
        assert_eq!(s.failure_threshold(), 1);

        s.mark_failed(2, 5);
        assert!(!s.threshold_tripped());
        s.mark_failed(7, 5);
        assert!(s.threshold_tripped());
    }

    #[test]
    fn test_threshold_small_plans() {
        let s = session(2 * MIB, MIB);
        assert_eq!(s.failure_threshold(), 1);
        let s = session(25 * MIB, MIB);
        assert_eq!(s.failure_threshold(), 3);
    }

    #[test]
    fn test_reset_failed_keeps_completed() {
        let mut s = session(4 * MIB, MIB);
        s.mark_completed(0, 1);
        s.mark_failed(1, 5);
        s.mark_failed(2, 5);
        s.error = Some(UploadFailure::new(FailureKind::Threshold, "too many"));

        s.reset_failed();
        assert!(s.failed.is_empty());
        assert!(s.error.is_none());
        assert!(s.completed.contains(&0));
        assert_eq!(s.chunks[1].status, ChunkStatus::Pending);
        assert_eq!(s.chunks[1].attempts, 0);
    }

    #[test]
    fn test_empty_file_progress() {
        let mut s = session(0, MIB);
        assert_eq!(s.progress_percent(), 0.0);
        s.mark_completed(0, 1);
        assert_eq!(s.progress_percent(), 100.0);
        assert!(s.is_complete());
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(0.0, 1024), "Calculating…");
        assert_eq!(format_eta(1024.0, 10 * 1024), "10s");
        assert_eq!(format_eta(1024.0, 120 * 1024), "2m");
        assert_eq!(format_eta(1024.0, 7200 * 1024), "2h");
    }

    #[test]
    fn test_speed_zero_before_start() {
        let s = session(MIB, MIB);
        assert_eq!(s.speed_bps(), 0.0);
        assert_eq!(s.eta(), "Calculating…");
    }
}
