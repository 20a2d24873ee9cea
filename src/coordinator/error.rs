use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("controller is no longer running")]
    ControllerGone,

    #[error("chunk error: {0}")]
    Chunk(#[from] crate::chunk::ChunkError),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("hash error: {0}")]
    Hash(#[from] crate::hash::HashError),

    #[error("provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
