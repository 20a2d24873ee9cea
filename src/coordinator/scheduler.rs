//! Chunk workers.
//!
//! A worker owns one semaphore permit for the lifetime of one chunk: hash,
//! read, PUT and the whole retry loop all happen under it, so at most
//! `concurrency` chunks are in flight and at most that many hash jobs are
//! ever pending.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::coordinator::types::WorkerEvent;
use crate::hash::{hex_digest, HashService};
use crate::net::Sample;
use crate::provider::{ChunkMeta, ChunkReceipt, ChunkTarget, ProviderAdapter, ProviderError};
use crate::retry::{self, RetryDecision};
use crate::source::ByteSource;

/// Read-only description of the chunk a worker is responsible for.
#[derive(Debug, Clone)]
pub(crate) struct ChunkJob {
    pub index: u32,
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
    pub hash: Option<[u8; 32]>,
    pub target: ChunkTarget,
}

pub(crate) struct WorkerContext<A: ?Sized> {
    pub source: Arc<dyn ByteSource>,
    pub adapter: Arc<A>,
    pub hasher: HashService,
    pub events: mpsc::Sender<WorkerEvent>,
    pub cancel: CancellationToken,
}

pub(crate) async fn run_chunk_worker<A>(
    ctx: WorkerContext<A>,
    job: ChunkJob,
    permit: OwnedSemaphorePermit,
) where
    A: ProviderAdapter + ?Sized,
{
    // Held until the worker returns: acquire-work-release spans the full
    // retry loop, never just a single attempt.
    let _permit = permit;

    let mut attempts = 0u32;
    let mut send_from = job.start;
    let mut bytes: Option<Bytes> = None;
    let mut hash = job.hash;

    loop {
        if ctx.cancel.is_cancelled() {
            let _ = ctx.events.send(WorkerEvent::Aborted { index: job.index }).await;
            return;
        }

        match attempt_chunk(&ctx, &job, &mut bytes, &mut hash, send_from).await {
            Ok((receipt, elapsed, sent)) => {
                let sample = make_sample(&receipt, elapsed, sent);
                let _ = ctx
                    .events
                    .send(WorkerEvent::Completed {
                        index: job.index,
                        attempts: attempts + 1,
                        etag: receipt.etag,
                        sample,
                    })
                    .await;
                return;
            }
            Err(ProviderError::Cancelled) => {
                let _ = ctx.events.send(WorkerEvent::Aborted { index: job.index }).await;
                return;
            }
            Err(error) => {
                attempts += 1;

                // An incomplete result moves the cursor: only the tail the
                // provider has not acknowledged is re-sent.
                if let ProviderError::Incomplete { next_offset } = &error {
                    send_from = (*next_offset).clamp(job.start, job.end);
                }

                match retry::decide(attempts, &error) {
                    RetryDecision::Retry(delay) => {
                        tracing::warn!(
                            chunk = job.index,
                            attempt = attempts,
                            %error,
                            delay_ms = delay.as_millis() as u64,
                            "chunk attempt failed, retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = ctx.cancel.cancelled() => {
                                let _ = ctx
                                    .events
                                    .send(WorkerEvent::Aborted { index: job.index })
                                    .await;
                                return;
                            }
                        }
                    }
                    RetryDecision::GiveUp => {
                        let _ = ctx
                            .events
                            .send(WorkerEvent::Failed {
                                index: job.index,
                                attempts,
                                error,
                            })
                            .await;
                        return;
                    }
                }
            }
        }
    }
}

/// One attempt: ensure the chunk hash and payload are present, then PUT the
/// unacknowledged range. Hash and read failures count against the same
/// retry budget as transport faults.
async fn attempt_chunk<A>(
    ctx: &WorkerContext<A>,
    job: &ChunkJob,
    bytes: &mut Option<Bytes>,
    hash: &mut Option<[u8; 32]>,
    send_from: u64,
) -> Result<(ChunkReceipt, Duration, usize), ProviderError>
where
    A: ProviderAdapter + ?Sized,
{
    let size = (job.end - job.start) as usize;

    let chunk_hash = match hash {
        Some(h) => *h,
        None => {
            let computed = ctx
                .hasher
                .hash_chunk(ctx.source.clone(), job.index, job.start, size)
                .await
                .map_err(|e| ProviderError::Transport(format!("hash failed: {e}")))?;
            *hash = Some(computed);
            computed
        }
    };

    let payload = match bytes {
        Some(b) => b.clone(),
        None => {
            let source = ctx.source.clone();
            let (start, len) = (job.start, size);
            let read = tokio::task::spawn_blocking(move || source.read_range(start, len))
                .await
                .map_err(|e| ProviderError::Transport(format!("read task failed: {e}")))?
                .map_err(|e| ProviderError::Transport(format!("read failed: {e}")))?;
            *bytes = Some(read.clone());
            read
        }
    };

    let body = payload.slice((send_from - job.start) as usize..);
    let sent = body.len();
    let meta = ChunkMeta {
        start: send_from,
        end: job.end,
        total_size: job.total_size,
        chunk_hash: Some(hex_digest(&chunk_hash)),
    };

    let started = Instant::now();
    let receipt = ctx
        .adapter
        .upload_chunk(body, &job.target, &meta, &ctx.cancel)
        .await?;
    Ok((receipt, started.elapsed(), sent))
}

fn make_sample(receipt: &ChunkReceipt, elapsed: Duration, sent: usize) -> Sample {
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { sent as f64 / secs } else { 0.0 };
    let latency_ms = receipt.latency.unwrap_or(elapsed).as_secs_f64() * 1000.0;
    Sample::new(speed, latency_ms)
}
