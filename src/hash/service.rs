use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use super::error::{HashError, Result};
use crate::source::ByteSource;

/// Block size for streaming whole-file digests.
const FILE_READ_BLOCK: usize = 256 * 1024;

/// SHA-256 of a byte slice.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex rendering, the form providers use for hash-based dedup.
pub fn hex_digest(digest: &[u8; 32]) -> String {
    hex::encode(digest)
}

enum HashJob {
    File {
        source: Arc<dyn ByteSource>,
        reply: oneshot::Sender<Result<[u8; 32]>>,
    },
    Chunk {
        source: Arc<dyn ByteSource>,
        index: u32,
        start: u64,
        len: usize,
        reply: oneshot::Sender<Result<[u8; 32]>>,
    },
}

/// Background SHA-256 service.
///
/// Digests are CPU-bound, so every job runs under `spawn_blocking` instead
/// of on the controller's event loop. Each request carries its own oneshot
/// reply handle; completions cannot be routed to the wrong requester.
#[derive(Clone)]
pub struct HashService {
    tx: mpsc::Sender<HashJob>,
}

impl HashService {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<HashJob>(32);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                tokio::task::spawn_blocking(move || run_job(job));
            }
        });

        Self { tx }
    }

    /// Request a whole-file digest without waiting for it. The returned
    /// receiver resolves when the digest is ready.
    pub async fn request_file_hash(
        &self,
        source: Arc<dyn ByteSource>,
    ) -> Result<oneshot::Receiver<Result<[u8; 32]>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HashJob::File { source, reply })
            .await
            .map_err(|_| HashError::ServiceStopped)?;
        Ok(rx)
    }

    pub async fn hash_file(&self, source: Arc<dyn ByteSource>) -> Result<[u8; 32]> {
        let rx = self.request_file_hash(source).await?;
        rx.await.map_err(|_| HashError::ServiceStopped)?
    }

    pub async fn hash_chunk(
        &self,
        source: Arc<dyn ByteSource>,
        index: u32,
        start: u64,
        len: usize,
    ) -> Result<[u8; 32]> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HashJob::Chunk {
                source,
                index,
                start,
                len,
                reply,
            })
            .await
            .map_err(|_| HashError::ServiceStopped)?;
        rx.await.map_err(|_| HashError::ServiceStopped)?
    }
}

fn run_job(job: HashJob) {
    match job {
        HashJob::File { source, reply } => {
            let _ = reply.send(hash_source(source.as_ref()));
        }
        HashJob::Chunk {
            source,
            index,
            start,
            len,
            reply,
        } => {
            let result = source
                .read_range(start, len)
                .map(|bytes| digest(&bytes))
                .map_err(|source| HashError::Chunk { index, source });
            let _ = reply.send(result);
        }
    }
}

fn hash_source(source: &dyn ByteSource) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let total = source.len();
    let mut offset = 0u64;

    while offset < total {
        let len = FILE_READ_BLOCK.min((total - offset) as usize);
        let block = source.read_range(offset, len).map_err(HashError::File)?;
        hasher.update(&block);
        offset += len as u64;
    }

    Ok(hasher.finalize().into())
}
