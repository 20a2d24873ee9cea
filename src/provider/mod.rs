//! Provider adapters.
//!
//! Every provider exposes the same four-operation capability set
//! {initialize, upload_chunk, finalize, abort}; the concrete wire behavior
//! (presigned part PUTs vs. a single resumable session URL) lives behind
//! [`ProviderAdapter`]. Adapters never retry internally — retries belong to
//! the scheduler — and share no state with each other.

pub mod control;
pub mod error;
pub mod resumable;
pub mod s3;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

pub use control::{ControlPlaneClient, MAX_CHUNK_COUNT, MAX_FILE_SIZE};
pub use error::{ProviderError, Result};
pub use resumable::ResumableAdapter;
pub use s3::S3Adapter;
pub use types::{
    ChunkMeta, ChunkReceipt, ChunkTarget, CompletedPart, FileInfo, FinalizeResult,
    InitializeResult, ProviderKind,
};

/// Default per-request deadline; a timeout is a retryable transport error.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Open a provider session and obtain one transfer target per chunk.
    async fn initialize(&self, info: &FileInfo) -> Result<InitializeResult>;

    /// Transfer one chunk (or the tail of one, after an incomplete result).
    /// Must observe `cancel` while the request is in flight.
    async fn upload_chunk(
        &self,
        bytes: Bytes,
        target: &ChunkTarget,
        meta: &ChunkMeta,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt>;

    /// Complete the session. S3 consumes the parts list; resumable
    /// providers ignore it.
    async fn finalize(&self, upload_id: &str, parts: Vec<CompletedPart>) -> Result<FinalizeResult>;

    /// Tear the session down. Idempotent; "not found" is success.
    async fn abort(&self, upload_id: &str) -> Result<()>;

    /// Targets for a plan of `chunk_count` chunks, used when the remaining
    /// plan is rebuilt mid-session. Resumable providers re-fan their session
    /// URL to any count; fixed presigned targets only fit the original
    /// count, and `None` keeps the existing plan.
    fn targets_for(&self, init: &InitializeResult, chunk_count: usize) -> Option<Vec<ChunkTarget>> {
        if let Some(url) = &init.resumable_url {
            return Some(vec![ChunkTarget::put(url.clone()); chunk_count]);
        }
        (init.targets.len() == chunk_count).then(|| init.targets.clone())
    }
}

/// Tagged provider dispatch, one variant per supported backend.
pub enum ProviderClient {
    S3(S3Adapter),
    GoogleDrive(ResumableAdapter),
    Gcs(ResumableAdapter),
}

impl ProviderClient {
    pub fn new(kind: ProviderKind, control: ControlPlaneClient, timeout: Duration) -> Self {
        match kind {
            ProviderKind::S3 => Self::S3(S3Adapter::new(control, timeout)),
            ProviderKind::GoogleDrive => {
                Self::GoogleDrive(ResumableAdapter::google_drive(control, timeout))
            }
            ProviderKind::Gcs => Self::Gcs(ResumableAdapter::gcs(control, timeout)),
        }
    }

    fn inner(&self) -> &dyn ProviderAdapter {
        match self {
            Self::S3(a) => a,
            Self::GoogleDrive(a) => a,
            Self::Gcs(a) => a,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ProviderClient {
    async fn initialize(&self, info: &FileInfo) -> Result<InitializeResult> {
        self.inner().initialize(info).await
    }

    async fn upload_chunk(
        &self,
        bytes: Bytes,
        target: &ChunkTarget,
        meta: &ChunkMeta,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt> {
        self.inner().upload_chunk(bytes, target, meta, cancel).await
    }

    async fn finalize(&self, upload_id: &str, parts: Vec<CompletedPart>) -> Result<FinalizeResult> {
        self.inner().finalize(upload_id, parts).await
    }

    async fn abort(&self, upload_id: &str) -> Result<()> {
        self.inner().abort(upload_id).await
    }

    fn targets_for(&self, init: &InitializeResult, chunk_count: usize) -> Option<Vec<ChunkTarget>> {
        self.inner().targets_for(init, chunk_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAdapter;

    #[async_trait]
    impl ProviderAdapter for NoopAdapter {
        async fn initialize(&self, _info: &FileInfo) -> Result<InitializeResult> {
            unimplemented!()
        }
        async fn upload_chunk(
            &self,
            _bytes: Bytes,
            _target: &ChunkTarget,
            _meta: &ChunkMeta,
            _cancel: &CancellationToken,
        ) -> Result<ChunkReceipt> {
            unimplemented!()
        }
        async fn finalize(
            &self,
            _upload_id: &str,
            _parts: Vec<CompletedPart>,
        ) -> Result<FinalizeResult> {
            unimplemented!()
        }
        async fn abort(&self, _upload_id: &str) -> Result<()> {
            unimplemented!()
        }
    }

    fn init_with(targets: usize, resumable: Option<&str>) -> InitializeResult {
        InitializeResult {
            upload_id: "u".into(),
            object_key: None,
            targets: (0..targets)
                .map(|i| ChunkTarget::put(format!("http://part/{i}")))
                .collect(),
            resumable_url: resumable.map(String::from),
        }
    }

    #[test]
    fn test_targets_for_resumable_refans_any_count() {
        let init = init_with(4, Some("http://sess"));
        let targets = NoopAdapter.targets_for(&init, 9).unwrap();
        assert_eq!(targets.len(), 9);
        assert!(targets.iter().all(|t| t.url == "http://sess"));
    }

    #[test]
    fn test_targets_for_fixed_urls_only_fit_original_count() {
        let init = init_with(4, None);
        assert!(NoopAdapter.targets_for(&init, 5).is_none());
        let same = NoopAdapter.targets_for(&init, 4).unwrap();
        assert_eq!(same.len(), 4);
        assert_eq!(same[2].url, "http://part/2");
    }
}
