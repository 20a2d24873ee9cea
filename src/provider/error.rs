use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Resumable PUT acknowledged only a prefix (HTTP 308); `next_offset`
    /// is the first byte the provider has not yet received.
    #[error("upload incomplete, next byte {next_offset}")]
    Incomplete { next_offset: u64 },

    #[error("malformed provider response: {0}")]
    Protocol(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transport faults, 5xx, 408, 429 and incomplete results may be
    /// retried; everything else is permanent for the chunk.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_)
            | ProviderError::Timeout(_)
            | ProviderError::Incomplete { .. } => true,
            ProviderError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ProviderError::Validation(_)
            | ProviderError::Protocol(_)
            | ProviderError::Cancelled => false,
        }
    }

    /// Classify a reqwest error, attributing a timeout to the deadline the
    /// request was actually sent with (reqwest does not surface it back).
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(timeout)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
