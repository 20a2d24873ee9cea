//! Client for the backend control plane that issues presigned/resumable
//! URLs and proxies provider session calls. JSON over HTTPS, camelCase
//! field names.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{ProviderError, Result};
use super::types::{CompletedPart, FileInfo, ProviderKind};

/// Server-side ceiling on upload size, enforced client-side before any
/// network call.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;
/// Server-side ceiling on the number of chunks per session.
pub const MAX_CHUNK_COUNT: u32 = 10_000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub filename: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    pub chunk_count: u32,
    pub storage_type: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub upload_id: String,
    /// Generic per-chunk URL list.
    #[serde(default)]
    pub chunk_urls: Vec<String>,
    /// S3: one presigned PUT URL per part.
    #[serde(default)]
    pub presigned_urls: Vec<String>,
    /// Drive/GCS: a single session URL accepting ranged PUTs.
    #[serde(default)]
    pub resumable_url: Option<String>,
    #[serde(default)]
    pub object_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub upload_id: String,
    pub storage_type: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<CompletedPart>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    #[serde(default)]
    pub final_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AbortRequest {
    upload_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub progress: f64,
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub failed_chunks: u32,
    #[serde(default)]
    pub final_url: Option<String>,
}

/// Reject inputs the server would bounce anyway.
pub fn validate_file_info(info: &FileInfo) -> Result<()> {
    if info.filename.trim().is_empty() {
        return Err(ProviderError::Validation("filename must not be empty".into()));
    }
    if info.total_size > MAX_FILE_SIZE {
        return Err(ProviderError::Validation(format!(
            "file size {} exceeds the {} byte limit",
            info.total_size, MAX_FILE_SIZE
        )));
    }
    if info.chunk_count > MAX_CHUNK_COUNT {
        return Err(ProviderError::Validation(format!(
            "chunk count {} exceeds the limit of {}",
            info.chunk_count, MAX_CHUNK_COUNT
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ControlPlaneClient {
    base: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl ControlPlaneClient {
    pub fn new(base: Url) -> Self {
        Self::with_timeout(base, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base: Url, timeout: Duration) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
            timeout,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| ProviderError::Protocol(format!("bad endpoint {path}: {e}")))
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = self.endpoint(path)?;
        let resp = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        resp.json::<R>()
            .await
            .map_err(|e| ProviderError::Protocol(format!("bad response body: {e}")))
    }

    pub async fn initialize(&self, req: &InitializeRequest) -> Result<InitializeResponse> {
        self.post_json("/api/upload/initialize", req).await
    }

    pub async fn finalize(&self, req: &FinalizeRequest) -> Result<FinalizeResponse> {
        self.post_json("/api/upload/finalize", req).await
    }

    /// Best-effort session teardown; a session the server no longer knows
    /// about counts as successfully aborted.
    pub async fn abort(&self, upload_id: &str) -> Result<()> {
        let url = self.endpoint("/api/upload/abort")?;
        let resp = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&AbortRequest {
                upload_id: upload_id.to_string(),
            })
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        let status = resp.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        let message = resp.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn status(&self, upload_id: &str) -> Result<StatusResponse> {
        let url = self.endpoint(&format!("/api/upload/status/{upload_id}"))?;
        let resp = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<StatusResponse>()
            .await
            .map_err(|e| ProviderError::Protocol(format!("bad response body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(filename: &str, total_size: u64, chunk_count: u32) -> FileInfo {
        FileInfo {
            filename: filename.into(),
            total_size,
            file_hash: None,
            chunk_count,
            mime_type: None,
        }
    }

    #[test]
    fn test_validation_accepts_reasonable_input() {
        assert!(validate_file_info(&info("report.pdf", 5 * 1024 * 1024, 5)).is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_filename() {
        let err = validate_file_info(&info("  ", 1024, 1)).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn test_validation_rejects_oversized_file() {
        let err = validate_file_info(&info("big.bin", MAX_FILE_SIZE + 1, 10)).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(validate_file_info(&info("big.bin", MAX_FILE_SIZE, 10)).is_ok());
    }

    #[test]
    fn test_validation_rejects_too_many_chunks() {
        let err = validate_file_info(&info("f", 1024, MAX_CHUNK_COUNT + 1)).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(validate_file_info(&info("f", 1024, MAX_CHUNK_COUNT)).is_ok());
    }

    #[test]
    fn test_initialize_request_wire_shape() {
        let req = InitializeRequest {
            filename: "a.bin".into(),
            file_size: 42,
            file_hash: Some("deadbeef".into()),
            chunk_count: 1,
            storage_type: ProviderKind::S3,
            options: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["filename"], "a.bin");
        assert_eq!(json["fileSize"], 42);
        assert_eq!(json["fileHash"], "deadbeef");
        assert_eq!(json["chunkCount"], 1);
        assert_eq!(json["storageType"], "s3");
        assert!(json.get("options").is_none());
    }

    #[test]
    fn test_status_response_parses() {
        let status: StatusResponse = serde_json::from_str(
            r#"{"status":"uploading","progress":42.5,"completedChunks":17,
                "totalChunks":40,"failedChunks":1}"#,
        )
        .unwrap();
        assert_eq!(status.completed_chunks, 17);
        assert_eq!(status.failed_chunks, 1);
        assert!(status.final_url.is_none());
    }

    #[test]
    fn test_initialize_response_variants_parse() {
        let s3: InitializeResponse = serde_json::from_str(
            r#"{"uploadId":"u1","presignedUrls":["http://a","http://b"]}"#,
        )
        .unwrap();
        assert_eq!(s3.upload_id, "u1");
        assert_eq!(s3.presigned_urls.len(), 2);
        assert!(s3.resumable_url.is_none());

        let drive: InitializeResponse =
            serde_json::from_str(r#"{"uploadId":"u2","resumableUrl":"http://sess"}"#).unwrap();
        assert_eq!(drive.resumable_url.as_deref(), Some("http://sess"));
        assert!(drive.presigned_urls.is_empty());
    }
}
