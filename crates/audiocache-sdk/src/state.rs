//! Shared mutable cache state.
//!
//! The index and its running total are the only shared mutable data. Every
//! read-modify-write goes through [`CacheState::lock`], and the index is
//! persisted before the lock is released so snapshots land on disk in order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use audiocache_core::{
    remove_entry, CacheBudget, CacheEntry, CacheIndex, Clock, IndexStore, RemovalCause,
    StoragePrimitives,
};

pub(crate) struct CacheState {
    pub(crate) budget: CacheBudget,
    pub(crate) storage: Arc<dyn StoragePrimitives>,
    pub(crate) clock: Arc<dyn Clock>,
    index_store: Arc<dyn IndexStore>,
    index: Mutex<CacheIndex>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheState {
    /// Loads the persisted index, or starts empty when there is none or it
    /// cannot be read.
    pub(crate) fn load(
        budget: CacheBudget,
        storage: Arc<dyn StoragePrimitives>,
        index_store: Arc<dyn IndexStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_ms();
        let index = match index_store.load() {
            Ok(Some(index)) => {
                log::debug!("Loaded cache index with {} entries", index.len());
                index
            }
            Ok(None) => CacheIndex::new(now),
            Err(err) => {
                log::warn!("Cache index unreadable, starting empty: {}", err);
                CacheIndex::new(now)
            }
        };

        Self {
            budget,
            storage,
            clock,
            index_store,
            index: Mutex::new(index),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CacheIndex> {
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes the index through the store. Failures are logged; the in-memory
    /// index stays authoritative.
    pub(crate) fn persist(&self, index: &CacheIndex) {
        if let Err(err) = self.index_store.persist(index) {
            log::warn!("Failed to persist cache index: {}", err);
        }
    }

    /// Removes `key` under the lock and persists if anything changed.
    pub(crate) fn remove(&self, key: &str, cause: RemovalCause) -> Option<CacheEntry> {
        let mut index = self.lock();
        let removed = remove_entry(&mut index, self.storage.as_ref(), key, cause);
        if removed.is_some() {
            self.persist(&index);
        }
        removed
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
