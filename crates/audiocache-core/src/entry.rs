//! Cache entry metadata.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clock::DAY_MS;

/// Eviction weight supplied by the caller at admission time.
///
/// Each unit of priority makes an entry look one day more recently used to the
/// eviction engine. The scale is local to this cache; priorities carried by
/// server recommendations are a separate field with their own meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    /// Priority of ordinary on-demand admissions.
    pub const DEFAULT: Priority = Priority(1);
    /// Priority used by bulk preloading when the item does not specify one.
    pub const PRELOAD: Priority = Priority(2);
    /// Threshold at and above which an entry counts as high priority.
    pub const HIGH: Priority = Priority(3);

    pub fn value(self) -> u32 {
        self.0
    }

    /// True for priorities at or above [`Priority::HIGH`].
    pub fn is_high(self) -> bool {
        self >= Priority::HIGH
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl From<u32> for Priority {
    fn from(value: u32) -> Self {
        Priority(value)
    }
}

/// Metadata for one cached file.
///
/// Serialized with the field names the persisted index and the sync manifest
/// have always used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Source URL the entry was admitted from.
    #[serde(rename = "url", default)]
    pub source_url: String,
    /// Location of the backing file.
    #[serde(rename = "filePath")]
    pub storage_path: PathBuf,
    /// Size in bytes, as last observed on storage.
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// Admission time (ms since epoch).
    #[serde(rename = "cachedAt")]
    pub cached_at: u64,
    /// Last successful retrieval (ms since epoch).
    #[serde(rename = "lastAccessed")]
    pub last_accessed_at: u64,
    #[serde(rename = "accessCount", default)]
    pub access_count: u64,
    #[serde(default)]
    pub priority: Priority,
    /// Set by a remote `update` action; a stale entry reads as a miss.
    #[serde(default)]
    pub stale: bool,
}

impl CacheEntry {
    /// Creates the entry for a fresh admission at `now_ms`.
    pub fn admitted(
        source_url: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        size_bytes: u64,
        priority: Priority,
        now_ms: u64,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            storage_path: storage_path.into(),
            size_bytes,
            cached_at: now_ms,
            last_accessed_at: now_ms,
            access_count: 1,
            priority,
            stale: false,
        }
    }

    /// Records a successful retrieval.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_accessed_at = now_ms;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Recency score used by eviction: last access shifted forward by one day
    /// per priority unit. Lowest score is evicted first.
    pub fn adjusted_recency(&self) -> u64 {
        self.last_accessed_at
            .saturating_add(u64::from(self.priority.0).saturating_mul(DAY_MS))
    }

    /// Age since admission.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.cached_at)
    }

    /// Whole days since the last retrieval.
    pub fn days_since_access(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_accessed_at) / DAY_MS
    }
}
