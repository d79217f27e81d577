//! Error type shared by the cache engine and the SDK façade.

use std::time::Duration;

use thiserror::Error;

use crate::http::RetryableError;

/// Errors surfaced by cache operations.
///
/// Only admission surfaces errors to callers. Removal, eviction, expiry and
/// reconciliation never fail from the index's point of view; their I/O
/// problems are logged instead of being converted into one of these variants.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Download failed: {0}")]
    Download(String),
    #[error("File metadata unavailable: {0}")]
    MetadataUnavailable(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

impl RetryableError for CacheError {
    fn is_retryable(&self) -> bool {
        match self {
            CacheError::Network(_) => true,
            CacheError::RateLimited { .. } => true,
            CacheError::Timeout { .. } => true,

            CacheError::Download(_) => false,
            CacheError::MetadataUnavailable(_) => false,
            CacheError::Storage(_) => false,
            CacheError::Config(_) => false,
            CacheError::Io(_) => false,
            CacheError::Serialization(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CacheError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}
