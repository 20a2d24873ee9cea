use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    S3,
    GoogleDrive,
    Gcs,
}

impl ProviderKind {
    /// Value of the `storageType` field in the control-plane contract.
    pub fn storage_type(&self) -> &'static str {
        match self {
            ProviderKind::S3 => "s3",
            ProviderKind::GoogleDrive => "google_drive",
            ProviderKind::Gcs => "gcs",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.storage_type())
    }
}

/// What the adapter needs to know about the file at initialize time.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub filename: String,
    pub total_size: u64,
    /// Lowercase hex SHA-256 of the whole file; providers use it for
    /// hash-based dedup.
    pub file_hash: Option<String>,
    pub chunk_count: u32,
    pub mime_type: Option<String>,
}

/// Where and how one chunk gets PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTarget {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
}

impl ChunkTarget {
    pub fn put(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "PUT".into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct InitializeResult {
    pub upload_id: String,
    pub object_key: Option<String>,
    /// One target per planned chunk.
    pub targets: Vec<ChunkTarget>,
    /// Single ranged-PUT endpoint for resumable providers. Its presence
    /// means targets can be re-fanned for a different chunk count.
    pub resumable_url: Option<String>,
}

/// Range metadata accompanying a chunk PUT.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
    pub total_size: u64,
    /// Lowercase hex SHA-256 of the chunk payload.
    pub chunk_hash: Option<String>,
}

/// Successful chunk PUT.
#[derive(Debug, Clone, Default)]
pub struct ChunkReceipt {
    /// Strong ETag with surrounding quotes stripped (S3).
    pub etag: Option<String>,
    /// Time until response headers arrived, the closest client-side
    /// observation of time-to-first-byte.
    pub latency: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct FinalizeResult {
    pub final_url: String,
}

/// One accepted part of an S3 multipart upload. PartNumbers are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}
