//! Adaptive chunk sizing
//!
//! Maps observed network conditions onto a proposed chunk size.

/// Smallest chunk the engine will ever transfer.
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;
/// Largest chunk the engine will ever transfer.
pub const MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;
/// Reference chunk size at 1 MiB/s and negligible latency.
pub const BASE_CHUNK_SIZE: u64 = 1024 * 1024;

/// Propose a chunk size for the observed mean speed and latency.
///
/// `base * min(speed / 1 MiB/s, 8) * (1 + min(latency / 100ms, 4))`, clamped
/// to `[256 KiB, 16 MiB]` and rounded to the nearest power of two. High
/// latency favors larger chunks (fewer round trips), high speed favors
/// larger chunks (pipe is wide enough to keep busy).
pub fn propose_chunk_size(speed_bps: f64, latency_ms: f64, file_size: u64) -> u64 {
    let speed_factor = (speed_bps / BASE_CHUNK_SIZE as f64).clamp(0.0, 8.0);
    let latency_factor = (latency_ms / 100.0).clamp(0.0, 4.0);

    let candidate = BASE_CHUNK_SIZE as f64 * speed_factor * (1.0 + latency_factor);
    let clamped = candidate.clamp(MIN_CHUNK_SIZE as f64, MAX_CHUNK_SIZE as f64);

    let mut size = (1u64 << clamped.log2().round() as u32).clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);

    // A proposal beyond the file degenerates to a single chunk anyway; cap
    // it at the smallest power of two covering the whole file.
    if file_size > 0 {
        let cover = file_size.next_power_of_two().clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        size = size.min(cover);
    }

    size
}

/// The controller only applies a proposal that moves the chunk size by more
/// than half of its current value; smaller swings are not worth invalidating
/// the remaining plan.
pub fn should_retune(current: u64, proposed: u64) -> bool {
    proposed.abs_diff(current) * 2 > current
}
