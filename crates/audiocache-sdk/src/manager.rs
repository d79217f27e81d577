//! The audio cache façade.
//!
//! [`AudioCacheManager`] is a cheaply cloneable handle over shared state. All
//! index mutations happen under one lock; downloads and remote round-trips
//! happen outside it, so a slow network never blocks lookups.
//!
//! ```rust,no_run
//! use audiocache_sdk::{AudioCacheManager, CacheConfig, Priority};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = AudioCacheManager::new(CacheConfig::from_env()?)?;
//! let path = cache.cache_audio("https://cdn.example.com/tracks/intro.mp3", Priority::DEFAULT)?;
//! println!("playing {}", path.display());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use audiocache_core::{
    ensure_space, reconcile, remove_entry, sweep_expired, CacheBudget, CacheEntry, CacheError,
    CacheKey, CacheResult, Clock, EvictionReport, IndexStore, JsonFileIndexStore, Priority,
    ReconcileMode, ReconcileReport, RemovalCause, StoragePrimitives, SystemClock,
};

use crate::admission::AdmissionGate;
use crate::config::CacheConfig;
use crate::error::SyncResult;
use crate::remote::{HttpRemoteAuthority, IntegrityReport, RemoteAuthority};
use crate::state::CacheState;
use crate::stats::{CacheStats, ExtendedCacheStats, PerformanceStats};
use crate::storage::{FsStorage, HttpFetcher};
use crate::sync::{SyncClient, SyncOutcome};

/// Pluggable collaborators for [`AudioCacheManager::with_components`].
pub struct CacheComponents {
    pub storage: Arc<dyn StoragePrimitives>,
    pub index_store: Arc<dyn IndexStore>,
    pub remote: Option<Arc<dyn RemoteAuthority>>,
    pub clock: Arc<dyn Clock>,
}

impl CacheComponents {
    /// Storage and index store with the system clock and no remote.
    pub fn new(storage: Arc<dyn StoragePrimitives>, index_store: Arc<dyn IndexStore>) -> Self {
        Self {
            storage,
            index_store,
            remote: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteAuthority>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// One item for [`AudioCacheManager::preload_many`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadItem {
    pub url: String,
    /// Defaults to [`Priority::PRELOAD`].
    pub priority: Option<Priority>,
}

impl PreloadItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl From<&str> for PreloadItem {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// Per-item outcome of a preload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreloadReport {
    pub cached: Vec<(String, PathBuf)>,
    /// URL and error message for each item that could not be cached.
    pub failed: Vec<(String, String)>,
}

/// What a scheduler tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Keys expired by the periodic sweep (empty when the sweep was not due).
    pub expired: Vec<String>,
    /// Sync outcome, if a cycle was due.
    pub sync: Option<SyncOutcome>,
}

/// Local audio cache.
#[derive(Clone)]
pub struct AudioCacheManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: CacheConfig,
    state: CacheState,
    sync: SyncClient,
    admissions: AdmissionGate,
}

impl AudioCacheManager {
    /// Opens the cache described by `config` on the local filesystem, with an
    /// HTTP fetcher and (when configured) an HTTP remote authority.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        let fetcher = Arc::new(HttpFetcher::new(
            config.connect_timeout,
            config.download_timeout,
        ));
        let storage = FsStorage::new(&config.cache_dir, fetcher)?;
        storage.purge_partial_downloads();

        let remote: Option<Arc<dyn RemoteAuthority>> = match &config.remote_url {
            Some(url) if config.sync_enabled => Some(Arc::new(HttpRemoteAuthority::new(
                url,
                config.auth_token.clone(),
                config.connect_timeout,
                config.request_timeout,
            )?)),
            _ => None,
        };

        let components = CacheComponents {
            storage: Arc::new(storage),
            index_store: Arc::new(JsonFileIndexStore::new(config.index_path())),
            remote,
            clock: Arc::new(SystemClock),
        };
        Ok(Self::with_components(config, components))
    }

    /// Builds a manager over caller-supplied collaborators. Loads the index,
    /// then runs the expiry sweep and a passive reconciliation.
    pub fn with_components(config: CacheConfig, components: CacheComponents) -> Self {
        let remote = if config.sync_enabled {
            components.remote
        } else {
            None
        };
        let state = CacheState::load(
            config.budget.clone(),
            components.storage,
            components.index_store,
            components.clock,
        );

        let manager = Self {
            inner: Arc::new(ManagerInner {
                config,
                state,
                sync: SyncClient::new(remote),
                admissions: AdmissionGate::default(),
            }),
        };
        manager.initialize();
        manager
    }

    fn initialize(&self) {
        let expired = self.clean_expired_cache();
        let reconciled = self.check_cache_size();
        let stats = self.stats();
        log::info!(
            "Audio cache ready: {} files, {} ({} expired, {} missing on disk)",
            stats.file_count,
            stats.total_size_human(),
            expired.len(),
            reconciled.dropped.len()
        );
    }

    fn state(&self) -> &CacheState {
        &self.inner.state
    }

    /// True when `url` has a live, non-stale entry whose file exists.
    ///
    /// An entry whose file has vanished is dropped from the index here.
    pub fn is_cached(&self, url: &str) -> bool {
        let key = CacheKey::derive(url);
        self.probe(key.as_str(), false).is_some()
    }

    /// Returns the local path for `url` and records the access, or `None` on a
    /// miss.
    pub fn get_cached_path(&self, url: &str) -> Option<PathBuf> {
        let key = CacheKey::derive(url);
        let path = self.probe(key.as_str(), true);
        if path.is_some() {
            self.state().record_hit();
        } else {
            self.state().record_miss();
        }
        path
    }

    /// Ensures `url` is cached and returns its local path.
    ///
    /// On a miss the file is downloaded, room is made by eviction, and only
    /// then is the entry inserted. A failure at any step leaves the index as it
    /// was (apart from evictions that already ran). Concurrent calls for the
    /// same URL download once.
    pub fn cache_audio(&self, url: &str, priority: Priority) -> CacheResult<PathBuf> {
        let key = CacheKey::derive(url);

        if let Some(path) = self.probe(key.as_str(), true) {
            self.state().record_hit();
            return Ok(path);
        }

        let _permit = self.inner.admissions.acquire(key.as_str());
        // A concurrent admission for the same key may have finished meanwhile.
        if let Some(path) = self.probe(key.as_str(), true) {
            self.state().record_hit();
            return Ok(path);
        }
        self.state().record_miss();

        log::info!("Caching audio {} as '{}'", url, key);
        self.admit(url, &key, priority)
    }

    fn admit(&self, url: &str, key: &CacheKey, priority: Priority) -> CacheResult<PathBuf> {
        let state = self.state();
        let storage = state.storage.as_ref();

        let temp_path = storage.download(url)?;
        let size = match storage.stat(&temp_path) {
            Some(stat) => stat.size_bytes,
            None => {
                storage.delete(&temp_path).ok();
                return Err(CacheError::MetadataUnavailable(format!(
                    "downloaded file for {} has no metadata",
                    url
                )));
            }
        };

        let dest = storage.storage_path(key.as_str());
        let mut index = state.lock();

        // A stale predecessor gives up its bytes before eviction runs.
        if index.contains(key.as_str()) {
            remove_entry(&mut index, storage, key.as_str(), RemovalCause::Replaced);
        }
        ensure_space(&mut index, storage, &state.budget, size);

        if let Err(err) = storage.move_file(&temp_path, &dest) {
            storage.delete(&temp_path).ok();
            state.persist(&index);
            return Err(err);
        }

        index.insert(
            key.as_str(),
            CacheEntry::admitted(url, dest.clone(), size, priority, state.now_ms()),
        );
        state.persist(&index);

        log::info!("Cached '{}' ({} bytes, priority {})", key, size, priority.value());
        Ok(dest)
    }

    /// Looks up `key`, dropping its record if the file is gone. With `touch`,
    /// a hit records the access.
    fn probe(&self, key: &str, touch: bool) -> Option<PathBuf> {
        let state = self.state();
        let mut index = state.lock();

        let entry = index.get(key)?;
        if entry.stale {
            return None;
        }
        let path = entry.storage_path.clone();

        if state.storage.stat(&path).is_none() {
            log::info!("Cached file for '{}' is missing, dropping its record", key);
            index.remove(key);
            state.persist(&index);
            return None;
        }

        if touch {
            let now = state.now_ms();
            if let Some(entry) = index.get_mut(key) {
                entry.touch(now);
            }
            state.persist(&index);
        }
        Some(path)
    }

    /// Removes `url` from the cache. Returns false if it was not cached.
    pub fn remove_from_cache(&self, url: &str) -> bool {
        let key = CacheKey::derive(url);
        self.state()
            .remove(key.as_str(), RemovalCause::Explicit)
            .is_some()
    }

    /// Removes every entry. Returns how many were removed.
    pub fn clear_all_cache(&self) -> usize {
        let state = self.state();
        let mut index = state.lock();

        let mut removed = 0;
        for key in index.keys() {
            if remove_entry(&mut index, state.storage.as_ref(), &key, RemovalCause::Cleared).is_some() {
                removed += 1;
            }
        }
        state.persist(&index);

        log::info!("Cleared audio cache ({} files)", removed);
        removed
    }

    /// Caches each item in order. Failures are logged and reported, not
    /// propagated.
    pub fn preload_many(&self, items: &[PreloadItem]) -> PreloadReport {
        let mut report = PreloadReport::default();

        for item in items {
            let priority = item.priority.unwrap_or(Priority::PRELOAD);
            match self.cache_audio(&item.url, priority) {
                Ok(path) => report.cached.push((item.url.clone(), path)),
                Err(err) => {
                    log::warn!("Preload of {} failed: {}", item.url, err);
                    report.failed.push((item.url.clone(), err.to_string()));
                }
            }
        }

        log::info!(
            "Preload finished: {} cached, {} failed",
            report.cached.len(),
            report.failed.len()
        );
        report
    }

    /// Evicts until `required_bytes` (and one more entry) fit the budget.
    pub fn ensure_cache_space(&self, required_bytes: u64) -> EvictionReport {
        let state = self.state();
        let mut index = state.lock();
        let report = ensure_space(&mut index, state.storage.as_ref(), &state.budget, required_bytes);
        if !report.is_empty() {
            state.persist(&index);
        }
        report
    }

    /// Removes entries older than the TTL. Returns the expired keys.
    pub fn clean_expired_cache(&self) -> Vec<String> {
        let state = self.state();
        let now = state.now_ms();
        let mut index = state.lock();
        let expired = sweep_expired(&mut index, state.storage.as_ref(), state.budget.ttl_ms(), now);
        state.persist(&index);
        expired
    }

    /// Passive reconciliation: drops entries whose files are gone and fixes
    /// recorded sizes.
    pub fn check_cache_size(&self) -> ReconcileReport {
        self.reconcile(ReconcileMode::Passive)
    }

    /// Active reconciliation: like [`check_cache_size`](Self::check_cache_size)
    /// but also repoints every entry at the path derived from its key.
    pub fn rebuild_cache_metadata(&self) -> ReconcileReport {
        let report = self.reconcile(ReconcileMode::Rebuild);
        log::info!(
            "Rebuilt cache metadata: {} entries, {} bytes",
            self.state().lock().len(),
            report.total_after
        );
        report
    }

    fn reconcile(&self, mode: ReconcileMode) -> ReconcileReport {
        let state = self.state();
        let mut index = state.lock();
        let report = reconcile(&mut index, state.storage.as_ref(), mode);
        if report.diverged() || mode == ReconcileMode::Rebuild {
            state.persist(&index);
        }
        report
    }

    /// Asks the remote authority to validate local state, rebuilding metadata
    /// when it reports divergence and recommends a rebuild.
    pub fn validate_cache_integrity(&self) -> SyncResult<IntegrityReport> {
        let report = self.inner.sync.validate(self.state())?;

        if !report.is_valid {
            log::warn!(
                "Remote integrity check failed with {} issues",
                report.issues.len()
            );
            if report.recommends_rebuild() {
                self.rebuild_cache_metadata();
            }
        }
        Ok(report)
    }

    /// Runs a sync cycle now, unless one is already in flight.
    pub fn sync_with_server(&self) -> SyncOutcome {
        self.inner.sync.run(self.state())
    }

    /// Runs a sync cycle if the sync interval has elapsed since the last
    /// attempt.
    pub fn check_and_sync(&self) -> Option<SyncOutcome> {
        let now = self.state().now_ms();
        if self
            .inner
            .sync
            .is_due(now, self.state().budget.sync_interval_ms())
        {
            Some(self.sync_with_server())
        } else {
            None
        }
    }

    /// Periodic housekeeping: the expiry sweep when `clean_interval` has
    /// elapsed, then [`check_and_sync`](Self::check_and_sync).
    pub fn tick(&self) -> TickReport {
        let now = self.state().now_ms();
        let clean_interval_ms = self.inner.config.clean_interval.as_millis() as u64;
        let clean_due =
            now.saturating_sub(self.state().lock().last_clean_time()) >= clean_interval_ms;

        TickReport {
            expired: if clean_due {
                self.clean_expired_cache()
            } else {
                Vec::new()
            },
            sync: self.check_and_sync(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        let index = state.lock();
        CacheStats::new(
            index.len(),
            index.total_size_bytes(),
            state.budget.max_total_bytes,
            index.last_clean_time(),
        )
    }

    /// [`stats`](Self::stats) plus sync timing and hit/miss counters.
    pub fn extended_stats(&self) -> ExtendedCacheStats {
        let state = self.state();
        ExtendedCacheStats {
            cache: self.stats(),
            sync: self
                .inner
                .sync
                .status(state.now_ms(), state.budget.sync_interval_ms()),
            performance: PerformanceStats::new(state.hits(), state.misses()),
        }
    }

    pub fn budget(&self) -> &CacheBudget {
        &self.state().budget
    }

    pub fn cache_dir(&self) -> &Path {
        self.inner.config.cache_dir()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// [`cache_audio`](Self::cache_audio) on the blocking thread pool.
    pub async fn cache_audio_async(
        &self,
        url: impl Into<String>,
        priority: Priority,
    ) -> CacheResult<PathBuf> {
        let manager = self.clone();
        let url = url.into();
        tokio::task::spawn_blocking(move || manager.cache_audio(&url, priority))
            .await
            .map_err(|e| CacheError::Storage(format!("Task join error: {}", e)))?
    }

    /// [`preload_many`](Self::preload_many) on the blocking thread pool.
    pub async fn preload_many_async(&self, items: Vec<PreloadItem>) -> CacheResult<PreloadReport> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.preload_many(&items))
            .await
            .map_err(|e| CacheError::Storage(format!("Task join error: {}", e)))
    }

    /// [`sync_with_server`](Self::sync_with_server) on the blocking thread
    /// pool.
    pub async fn sync_with_server_async(&self) -> SyncOutcome {
        let manager = self.clone();
        match tokio::task::spawn_blocking(move || manager.sync_with_server()).await {
            Ok(outcome) => outcome,
            Err(e) => SyncOutcome::Failed {
                reason: format!("Task join error: {}", e),
            },
        }
    }
}
