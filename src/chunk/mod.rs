pub mod adaptive;
pub mod error;
pub mod planner;
pub mod types;

pub use adaptive::{propose_chunk_size, should_retune, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use error::{ChunkError, Result};
pub use planner::{plan, replan_pending};
pub use types::{Chunk, ChunkStatus};
