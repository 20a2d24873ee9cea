//! Resumable-session adapter shared by Google Drive and GCS: a single
//! provider-issued URL accepts ranged PUTs until the whole object has
//! arrived. HTTP 308 means "incomplete"; the `Range` response header names
//! the last byte the provider has persisted.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::control::{
    validate_file_info, ControlPlaneClient, FinalizeRequest, InitializeRequest,
};
use super::error::{ProviderError, Result};
use super::types::{
    ChunkMeta, ChunkReceipt, ChunkTarget, CompletedPart, FileInfo, FinalizeResult,
    InitializeResult, ProviderKind,
};
use super::ProviderAdapter;

pub struct ResumableAdapter {
    kind: ProviderKind,
    control: ControlPlaneClient,
    http: reqwest::Client,
    timeout: Duration,
}

impl ResumableAdapter {
    pub fn google_drive(control: ControlPlaneClient, timeout: Duration) -> Self {
        Self::new(ProviderKind::GoogleDrive, control, timeout)
    }

    pub fn gcs(control: ControlPlaneClient, timeout: Duration) -> Self {
        Self::new(ProviderKind::Gcs, control, timeout)
    }

    fn new(kind: ProviderKind, control: ControlPlaneClient, timeout: Duration) -> Self {
        Self {
            kind,
            control,
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }
}

/// `Content-Range: bytes S-E/T` with `E` inclusive. A zero-length range
/// (empty file) has no byte span to name and becomes `bytes */T`.
pub(crate) fn content_range(start: u64, end: u64, total: u64) -> String {
    if start >= end {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", start, end - 1, total)
    }
}

/// Parse the `Range: bytes=0-N` header of a 308 response; returns the first
/// byte the provider still needs.
pub(crate) fn next_offset_from_range(header: &str) -> Option<u64> {
    let (_, span) = header.trim().split_once('=')?;
    let (_, last) = span.split_once('-')?;
    last.trim().parse::<u64>().ok().map(|n| n + 1)
}

#[async_trait]
impl ProviderAdapter for ResumableAdapter {
    async fn initialize(&self, info: &FileInfo) -> Result<InitializeResult> {
        validate_file_info(info)?;

        let resp = self
            .control
            .initialize(&InitializeRequest {
                filename: info.filename.clone(),
                file_size: info.total_size,
                file_hash: info.file_hash.clone(),
                chunk_count: info.chunk_count,
                storage_type: self.kind,
                options: info
                    .mime_type
                    .as_ref()
                    .map(|m| serde_json::json!({ "mimeType": m })),
            })
            .await?;

        let resumable_url = resp
            .resumable_url
            .ok_or_else(|| ProviderError::Protocol("initialize returned no resumable URL".into()))?;

        // The single session URL is fanned out to one target per chunk; the
        // Content-Range header is what distinguishes them.
        let targets = vec![ChunkTarget::put(resumable_url.clone()); info.chunk_count as usize];

        Ok(InitializeResult {
            upload_id: resp.upload_id,
            object_key: resp.object_key,
            targets,
            resumable_url: Some(resumable_url),
        })
    }

    async fn upload_chunk(
        &self,
        bytes: Bytes,
        target: &ChunkTarget,
        meta: &ChunkMeta,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt> {
        let mut builder = self
            .http
            .put(&target.url)
            .timeout(self.timeout)
            .header(
                reqwest::header::CONTENT_RANGE,
                content_range(meta.start, meta.end, meta.total_size),
            )
            .body(bytes);
        for (name, value) in &target.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let started = Instant::now();
        let resp = tokio::select! {
            res = builder.send() => res.map_err(|e| ProviderError::from_reqwest(e, self.timeout))?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };
        let latency = started.elapsed();

        let status = resp.status().as_u16();
        if status == 308 {
            // Only a prefix landed; the scheduler re-issues the tail.
            let next_offset = resp
                .headers()
                .get(reqwest::header::RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(next_offset_from_range)
                .unwrap_or(meta.start);
            return Err(ProviderError::Incomplete { next_offset });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, message });
        }

        Ok(ChunkReceipt {
            etag: None,
            latency: Some(latency),
        })
    }

    async fn finalize(&self, upload_id: &str, _parts: Vec<CompletedPart>) -> Result<FinalizeResult> {
        // The last chunk's 2xx already completed the object on the wire;
        // this is a metadata lookup for the view URL.
        let resp = self
            .control
            .finalize(&FinalizeRequest {
                upload_id: upload_id.to_string(),
                storage_type: self.kind,
                parts: None,
            })
            .await?;

        let final_url = resp
            .final_url
            .filter(|_| resp.success)
            .ok_or_else(|| ProviderError::Protocol("finalize reported no final URL".into()))?;

        Ok(FinalizeResult { final_url })
    }

    async fn abort(&self, upload_id: &str) -> Result<()> {
        self.control.abort(upload_id).await
    }
}
