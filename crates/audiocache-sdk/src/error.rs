//! Sync-side error type.

use thiserror::Error;

/// Errors from the remote-authority side of the cache.
///
/// Scheduled sync cycles never surface these to the application; they show up
/// as [`SyncOutcome::Failed`](crate::SyncOutcome::Failed). Explicit calls such
/// as `validate_cache_integrity` and the scheduler's control methods return
/// them directly.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync is disabled (no remote authority configured)")]
    Disabled,
    #[error("remote authority error: {0}")]
    Remote(String),
    #[error("remote authority rejected request: {0}")]
    Rejected(String),
    #[error("sync scheduler spawn error: {0}")]
    Spawn(String),
    #[error("sync scheduler channel error: {0}")]
    Channel(String),
    #[error("sync scheduler join error: {0}")]
    Join(String),
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Recovers a typed error from a remote-authority failure, falling back to
    /// [`SyncError::Remote`] with the error chain as text.
    pub(crate) fn from_remote(err: anyhow::Error) -> Self {
        match err.downcast::<SyncError>() {
            Ok(typed) => typed,
            Err(other) => SyncError::Remote(format!("{:#}", other)),
        }
    }
}
