//! Cache Index - authoritative metadata for everything in the cache.
//!
//! The index maps cache keys to [`CacheEntry`] metadata and keeps a running
//! `total_size_bytes`. It is persisted as a small JSON document through an
//! [`IndexStore`]:
//!
//! ```json
//! {
//!   "files": { "22ci.mp3": { "filePath": "...", "size": 1024, ... } },
//!   "totalSize": 1024,
//!   "lastCleanTime": 1700000000000
//! }
//! ```
//!
//! The running total is kept in step by [`CacheIndex::insert`] and
//! [`CacheIndex::remove`]; the reconciler recomputes it from scratch with
//! [`CacheIndex::recompute_total`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::error::CacheResult;

/// In-memory cache index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheIndex {
    #[serde(rename = "files", default)]
    entries: HashMap<String, CacheEntry>,
    #[serde(rename = "totalSize", default)]
    total_size_bytes: u64,
    #[serde(rename = "lastCleanTime", default)]
    last_clean_time: u64,
}

impl CacheIndex {
    /// Creates an empty index whose last sweep is `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            total_size_bytes: 0,
            last_clean_time: now_ms,
        }
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.total_size_bytes
    }

    pub fn last_clean_time(&self) -> u64 {
        self.last_clean_time
    }

    pub fn set_last_clean_time(&mut self, now_ms: u64) {
        self.last_clean_time = now_ms;
    }

    /// All entries keyed by cache key.
    pub fn entries(&self) -> &HashMap<String, CacheEntry> {
        &self.entries
    }

    /// Snapshot of all keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Inserts or replaces an entry, keeping the running total in step.
    ///
    /// Returns the replaced entry, if any.
    pub fn insert(&mut self, key: impl Into<String>, entry: CacheEntry) -> Option<CacheEntry> {
        let size = entry.size_bytes;
        let previous = self.entries.insert(key.into(), entry);
        if let Some(old) = &previous {
            self.total_size_bytes = self.total_size_bytes.saturating_sub(old.size_bytes);
        }
        self.total_size_bytes = self.total_size_bytes.saturating_add(size);
        previous
    }

    /// Removes an entry and subtracts its size. Removing an absent key is a
    /// no-op.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key)?;
        self.total_size_bytes = self.total_size_bytes.saturating_sub(removed.size_bytes);
        Some(removed)
    }

    /// Records a new observed size for `key`, adjusting the running total.
    ///
    /// Returns `false` when the key is absent.
    pub fn update_size(&mut self, key: &str, size_bytes: u64) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        self.total_size_bytes = self
            .total_size_bytes
            .saturating_sub(entry.size_bytes)
            .saturating_add(size_bytes);
        entry.size_bytes = size_bytes;
        true
    }

    /// Recomputes `total_size_bytes` as the exact sum over all entries and
    /// returns it.
    pub fn recompute_total(&mut self) -> u64 {
        self.total_size_bytes = self.entries.values().map(|e| e.size_bytes).sum();
        self.total_size_bytes
    }

    /// The entry the eviction engine should remove next.
    ///
    /// Lowest [`CacheEntry::adjusted_recency`] wins; exact ties go to the lower
    /// priority, then to the smaller key so the choice is deterministic.
    pub fn eviction_candidate(&self) -> Option<&str> {
        self.entries
            .iter()
            .min_by(|(ka, a), (kb, b)| {
                a.adjusted_recency()
                    .cmp(&b.adjusted_recency())
                    .then(a.priority.cmp(&b.priority))
                    .then(ka.cmp(kb))
            })
            .map(|(key, _)| key.as_str())
    }
}

/// Durable slot holding the serialized index.
pub trait IndexStore: Send + Sync {
    /// Loads the persisted index. `Ok(None)` means nothing was stored yet.
    fn load(&self) -> CacheResult<Option<CacheIndex>>;

    /// Replaces the persisted index.
    fn persist(&self, index: &CacheIndex) -> CacheResult<()>;
}

/// Stores the index as pretty-printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileIndexStore {
    path: PathBuf,
}

impl JsonFileIndexStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IndexStore for JsonFileIndexStore {
    fn load(&self) -> CacheResult<Option<CacheIndex>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn persist(&self, index: &CacheIndex) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves a truncated index behind.
        let json = serde_json::to_string_pretty(index)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Keeps the serialized index in memory. Useful for hosts with their own
/// persistence and for tests.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    slot: Mutex<Option<String>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds the slot with an index, as if a previous process had saved it.
    pub fn with_index(index: &CacheIndex) -> CacheResult<Self> {
        Ok(Self {
            slot: Mutex::new(Some(serde_json::to_string(index)?)),
        })
    }

    /// Raw JSON currently stored.
    pub fn raw(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl IndexStore for MemoryIndexStore {
    fn load(&self) -> CacheResult<Option<CacheIndex>> {
        match self.raw() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn persist(&self, index: &CacheIndex) -> CacheResult<()> {
        let json = serde_json::to_string(index)?;
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(json);
        Ok(())
    }
}
