use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// One contiguous byte range of the source file, transferred as a single
/// HTTP request. Indices are contiguous from zero and always equal the
/// chunk's position in the plan, even after re-planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u32,
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
    pub is_last: bool,
    /// SHA-256 of the chunk payload, computed lazily by the worker.
    pub hash: Option<[u8; 32]>,
    pub attempts: u32,
    pub status: ChunkStatus,
}

impl Chunk {
    pub fn new(index: u32, start: u64, end: u64, is_last: bool) -> Self {
        Self {
            index,
            start,
            end,
            is_last,
            hash: None,
            attempts: 0,
            status: ChunkStatus::Pending,
        }
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// True while the chunk has never been attempted and is still pending.
    /// Only untouched chunks may be re-planned.
    pub fn is_untouched(&self) -> bool {
        self.attempts == 0 && self.status == ChunkStatus::Pending
    }
}
