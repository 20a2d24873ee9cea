use serde::{Deserialize, Serialize};

use crate::net::Sample;
use crate::provider::ProviderError;
use crate::session::{SessionStatus, UploadFailure};

/// User-driven lifecycle events applied to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Pause,
    Resume,
    Cancel,
    Retry,
    Complete,
    Fatal,
}

/// Commands a handle sends to its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Cancel,
    Retry,
}

/// What a chunk worker reports back to the controller. Each worker owns a
/// clone of the event sender, so the channel is single-producer per worker.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Completed {
        index: u32,
        attempts: u32,
        etag: Option<String>,
        sample: Sample,
    },
    Failed {
        index: u32,
        attempts: u32,
        error: ProviderError,
    },
    /// The worker unwound on cancellation without a permanent outcome.
    Aborted { index: u32 },
}

/// Point-in-time progress published on the watch channel after every state
/// change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub total_size: u64,
    pub bytes_done: u64,
    pub progress_percent: f64,
    pub completed_chunks: u32,
    pub failed_chunks: u32,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub speed_bps: f64,
    pub eta: String,
    pub final_location: Option<String>,
    pub error: Option<UploadFailure>,
}
