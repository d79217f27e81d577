//! Audio cache SDK - a bounded, self-healing local cache for downloaded audio.
//!
//! This crate wires the `audiocache-core` engine to the filesystem, HTTP, and a
//! remote authority:
//! - [`AudioCacheManager`]: the façade used by playback code
//! - [`FsStorage`] / [`HttpFetcher`]: local storage and downloads
//! - [`HttpRemoteAuthority`]: the sync-manifest and integrity endpoints
//! - [`SyncScheduler`]: background sweep and sync worker
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use audiocache_sdk::{AudioCacheManager, CacheConfig, Priority, SchedulerConfig, SyncScheduler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::default()
//!     .with_remote_url("https://api.example.com")
//!     .with_auth_token("token");
//! let cache = AudioCacheManager::new(config)?;
//! let _scheduler = SyncScheduler::start(cache.clone(), SchedulerConfig::default())?;
//!
//! let url = "https://cdn.example.com/tracks/intro.mp3";
//! let path = match cache.get_cached_path(url) {
//!     Some(path) => path,
//!     None => cache.cache_audio(url, Priority::DEFAULT)?,
//! };
//! println!("{} ({})", path.display(), cache.stats().total_size_human());
//! # Ok(())
//! # }
//! ```
//!
//! # Async
//!
//! The API is blocking and thread-safe. Inside a tokio runtime use the
//! `*_async` variants, which run on the blocking pool:
//!
//! ```rust,no_run
//! # use audiocache_sdk::{AudioCacheManager, Priority};
//! # async fn play(cache: AudioCacheManager) -> Result<(), audiocache_sdk::CacheError> {
//! let path = cache.cache_audio_async("https://cdn.example.com/a.mp3", Priority::DEFAULT).await?;
//! # Ok(())
//! # }
//! ```

mod admission;
pub mod config;
pub mod error;
pub mod manager;
pub mod remote;
pub mod scheduler;
mod state;
pub mod stats;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

pub use audiocache_core::{
    CacheBudget, CacheEntry, CacheError, CacheIndex, CacheKey, CacheResult, Clock, EvictionReport,
    IndexStore, JsonFileIndexStore, ManualClock, MemoryIndexStore, Priority, ReconcileReport,
    StoragePrimitives, SystemClock,
};

pub use config::CacheConfig;
pub use error::{SyncError, SyncResult};
pub use manager::{AudioCacheManager, CacheComponents, PreloadItem, PreloadReport, TickReport};
pub use remote::{
    HttpRemoteAuthority, IntegrityReport, RemoteAuthority, SyncAction, SyncActionKind,
    SyncManifest,
};
pub use scheduler::{SchedulerConfig, SyncScheduler};
pub use stats::{CacheStats, ExtendedCacheStats, PerformanceStats, SyncStats};
pub use storage::{Fetcher, FsStorage, HttpFetcher};
pub use sync::{SyncOutcome, SyncReport};
