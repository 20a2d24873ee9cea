//! S3 multipart adapter: per-part presigned PUT URLs, strong ETags, and an
//! explicit CompleteMultipartUpload with parts sorted by 1-based PartNumber.

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

pub struct S3Adapter {
    control: ControlPlaneClient,
    http: reqwest::Client,
    timeout: Duration,
}

impl S3Adapter {
    pub fn new(control: ControlPlaneClient, timeout: Duration) -> Self {
        Self {
            control,
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

/// S3 quotes strong ETags on the wire; the multipart completion wants them
/// bare.
pub(crate) fn strip_etag_quotes(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

#[async_trait]
impl ProviderAdapter for S3Adapter {
    async fn initialize(&self, info: &FileInfo) -> Result<InitializeResult> {
        validate_file_info(info)?;

        let resp = self
            .control
            .initialize(&InitializeRequest {
                filename: info.filename.clone(),
                file_size: info.total_size,
                file_hash: info.file_hash.clone(),
                chunk_count: info.chunk_count,
                storage_type: ProviderKind::S3,
                options: None,
            })
            .await?;

        let urls = if resp.presigned_urls.is_empty() {
            resp.chunk_urls
        } else {
            resp.presigned_urls
        };
        if urls.len() != info.chunk_count as usize {
            return Err(ProviderError::Protocol(format!(
                "expected {} presigned URLs, got {}",
                info.chunk_count,
                urls.len()
            )));
        }

        let targets = urls
            .into_iter()
            .map(|url| {
                ChunkTarget::put(url).with_header("Content-Type", "application/octet-stream")
            })
            .collect();

        Ok(InitializeResult {
            upload_id: resp.upload_id,
            object_key: resp.object_key,
            targets,
            resumable_url: None,
        })
    }

    async fn upload_chunk(
        &self,
        bytes: Bytes,
        target: &ChunkTarget,
        _meta: &ChunkMeta,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt> {
        let mut builder = self
            .http
            .put(&target.url)
            .timeout(self.timeout)
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

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(strip_etag_quotes)
            .ok_or_else(|| ProviderError::Protocol("part response carried no ETag".into()))?;

        Ok(ChunkReceipt {
            etag: Some(etag),
            latency: Some(latency),
        })
    }

    async fn finalize(&self, upload_id: &str, mut parts: Vec<CompletedPart>) -> Result<FinalizeResult> {
        // CompleteMultipartUpload requires PartNumbers in ascending order.
        parts.sort_by_key(|p| p.part_number);

        let resp = self
            .control
            .finalize(&FinalizeRequest {
                upload_id: upload_id.to_string(),
                storage_type: ProviderKind::S3,
                parts: Some(parts),
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
