use super::error::{ChunkError, Result};
use super::types::Chunk;

/// Split `[0, total_size)` into an ordered sequence of contiguous chunks.
///
/// Chunk `i` covers `[i * chunk_size, min((i + 1) * chunk_size, total_size))`.
/// An empty file yields exactly one zero-length chunk with `is_last` set, so
/// the session still has something to initialize and finalize against.
pub fn plan(total_size: u64, chunk_size: u64) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(ChunkError::InvalidChunkSize(chunk_size));
    }

    if total_size == 0 {
        return Ok(vec![Chunk::new(0, 0, 0, true)]);
    }

    let n_chunks = total_size.div_ceil(chunk_size);
    let mut chunks = Vec::with_capacity(n_chunks as usize);

    for i in 0..n_chunks {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(total_size);
        chunks.push(Chunk::new(i as u32, start, end, end == total_size));
    }

    Ok(chunks)
}

/// Rebuild the plan's tail with a new chunk size.
///
/// Completed and attempted chunks keep their original boundaries so provider
/// part integrity is preserved; only the contiguous run of untouched chunks
/// after the last touched one is rebuilt. Returns whether the plan changed.
pub fn replan_pending(chunks: &mut Vec<Chunk>, new_chunk_size: u64) -> Result<bool> {
    if new_chunk_size == 0 {
        return Err(ChunkError::InvalidChunkSize(new_chunk_size));
    }

    let total_size = match chunks.last() {
        Some(last) => last.end,
        None => return Ok(false),
    };

    let cut = chunks
        .iter()
        .rposition(|c| !c.is_untouched())
        .map(|i| i + 1)
        .unwrap_or(0);
    if cut >= chunks.len() {
        return Ok(false);
    }

    let offset = chunks[cut].start;
    if offset >= total_size {
        return Ok(false);
    }

    let tail_len = total_size - offset;
    let n_tail = tail_len.div_ceil(new_chunk_size);

    // Same boundaries as before: nothing to do.
    let unchanged = chunks.len() - cut == n_tail as usize
        && chunks[cut].size() == new_chunk_size.min(tail_len);
    if unchanged {
        return Ok(false);
    }

    chunks.truncate(cut);
    for i in 0..n_tail {
        let start = offset + i * new_chunk_size;
        let end = (start + new_chunk_size).min(total_size);
        chunks.push(Chunk::new((cut as u64 + i) as u32, start, end, end == total_size));
    }

    Ok(true)
}
