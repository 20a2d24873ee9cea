use thiserror::Error;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("failed to hash chunk {index}: {source}")]
    Chunk {
        index: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to hash file: {0}")]
    File(#[source] std::io::Error),

    #[error("hash service is no longer running")]
    ServiceStopped,
}

pub type Result<T> = std::result::Result<T, HashError>;
