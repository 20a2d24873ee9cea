//! Upload session parameters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::provider::ProviderKind;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 8;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("chunk size {0} must be a power of two between 256 KiB and 16 MiB")]
    ChunkSize(u64),

    #[error("concurrency {0} must be between 1 and 8")]
    Concurrency(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOptions {
    pub provider: ProviderKind,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub auto_tune: bool,
    #[serde(default)]
    pub mime_type: Option<String>,
}

fn default_chunk_size() -> u64 {
    1024 * 1024
}

fn default_concurrency() -> usize {
    4
}

impl UploadOptions {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            auto_tune: false,
            mime_type: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.chunk_size.is_power_of_two()
            || !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size)
        {
            return Err(ConfigError::ChunkSize(self.chunk_size));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::Concurrency(self.concurrency));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(UploadOptions::new(ProviderKind::S3).validate().is_ok());
    }

    #[test]
    fn test_every_selector_chunk_size_validates() {
        for shift in 18..=24u32 {
            let mut opts = UploadOptions::new(ProviderKind::Gcs);
            opts.chunk_size = 1 << shift; // 256K, 512K, 1M, 2M, 4M, 8M, 16M
            assert!(opts.validate().is_ok(), "1<<{shift} should validate");
        }
    }

    #[test]
    fn test_rejects_off_range_chunk_sizes() {
        for size in [0, 128 * 1024, 32 * 1024 * 1024] {
            let mut opts = UploadOptions::new(ProviderKind::S3);
            opts.chunk_size = size;
            assert!(matches!(opts.validate(), Err(ConfigError::ChunkSize(_))));
        }
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let mut opts = UploadOptions::new(ProviderKind::S3);
        opts.chunk_size = 1024 * 1024 + 1;
        assert!(matches!(opts.validate(), Err(ConfigError::ChunkSize(_))));
    }

    #[test]
    fn test_concurrency_bounds() {
        for c in [1, 8] {
            let mut opts = UploadOptions::new(ProviderKind::S3);
            opts.concurrency = c;
            assert!(opts.validate().is_ok());
        }
        for c in [0, 9, 64] {
            let mut opts = UploadOptions::new(ProviderKind::S3);
            opts.concurrency = c;
            assert!(matches!(opts.validate(), Err(ConfigError::Concurrency(_))));
        }
    }
}
