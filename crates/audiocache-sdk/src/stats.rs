//! Cache statistics.

use serde::{Deserialize, Serialize};

/// Basic cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub file_count: usize,
    pub total_bytes: u64,
    /// Configured `max_total_bytes`.
    pub budget_bytes: u64,
    /// `total_bytes` as a percentage of the budget. Can exceed 100 when a
    /// single admission was larger than what eviction could free.
    pub usage_percent: f64,
    pub last_clean_time: u64,
}

impl CacheStats {
    pub(crate) fn new(file_count: usize, total_bytes: u64, budget_bytes: u64, last_clean_time: u64) -> Self {
        let usage_percent = if budget_bytes == 0 {
            0.0
        } else {
            total_bytes as f64 * 100.0 / budget_bytes as f64
        };

        Self {
            file_count,
            total_bytes,
            budget_bytes,
            usage_percent,
            last_clean_time,
        }
    }

    /// Get human-readable size.
    pub fn total_size_human(&self) -> String {
        format_bytes(self.total_bytes)
    }
}

/// Sync timing, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub enabled: bool,
    /// End of the last successful cycle (ms since epoch, 0 if never).
    pub last_sync_time: u64,
    /// Start of the last attempted cycle, successful or not.
    pub last_attempt_time: u64,
    pub sync_count: u64,
    pub sync_in_progress: bool,
    /// Time until the next scheduled cycle; `None` when sync is disabled.
    pub next_sync_in_ms: Option<u64>,
}

/// Lookup counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 before any lookup.
    pub hit_rate: f64,
}

impl PerformanceStats {
    pub(crate) fn new(hits: u64, misses: u64) -> Self {
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedCacheStats {
    #[serde(flatten)]
    pub cache: CacheStats,
    pub sync: SyncStats,
    pub performance: PerformanceStats,
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
