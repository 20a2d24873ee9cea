use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),
}

pub type Result<T> = std::result::Result<T, ChunkError>;
