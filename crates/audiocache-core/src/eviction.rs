//! Eviction engine and the shared removal primitive.
//!
//! Every removal path (explicit, eviction, expiry, remote instruction) goes
//! through [`remove_entry`], which never fails: the backing file is deleted on
//! a best-effort basis and the metadata is dropped regardless. A leaked file
//! is preferable to an index that points at nothing.

use std::fmt;

use crate::budget::CacheBudget;
use crate::entry::CacheEntry;
use crate::index::CacheIndex;
use crate::storage::StoragePrimitives;

/// Why an entry left the cache. Used for logging and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    Explicit,
    Eviction,
    Expired,
    Remote,
    Replaced,
    Cleared,
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemovalCause::Explicit => "explicit",
            RemovalCause::Eviction => "eviction",
            RemovalCause::Expired => "expired",
            RemovalCause::Remote => "remote",
            RemovalCause::Replaced => "replaced",
            RemovalCause::Cleared => "cleared",
        };
        f.write_str(name)
    }
}

/// Removes `key` from the cache: deletes its file (best-effort), then drops
/// the metadata and subtracts its size.
///
/// Returns the removed entry, or `None` if the key was not present. This
/// function has no error path by contract; delete failures are logged.
pub fn remove_entry(
    index: &mut CacheIndex,
    storage: &dyn StoragePrimitives,
    key: &str,
    cause: RemovalCause,
) -> Option<CacheEntry> {
    let path = index.get(key)?.storage_path.clone();

    if let Err(err) = storage.delete(&path) {
        log::warn!(
            "Failed to delete cached file {} ({}): {}",
            path.display(),
            cause,
            err
        );
    }

    let removed = index.remove(key)?;
    log::debug!(
        "Removed '{}' from cache ({}, {} bytes)",
        key,
        cause,
        removed.size_bytes
    );
    Some(removed)
}

/// Outcome of an [`ensure_space`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Keys evicted, in eviction order.
    pub evicted: Vec<String>,
    pub freed_bytes: u64,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// True while admitting `required` more bytes (and one more entry) would
/// break the budget.
pub fn needs_eviction(index: &CacheIndex, budget: &CacheBudget, required: u64) -> bool {
    index.total_size_bytes().saturating_add(required) > budget.max_total_bytes
        || index.len() >= budget.max_entry_count
}

/// Evicts lowest-value entries until `required` bytes and one entry slot fit
/// within `budget`, or the cache is empty.
///
/// When the cache empties before the request fits, the loop stops and the
/// admission proceeds over budget (soft limit).
pub fn ensure_space(
    index: &mut CacheIndex,
    storage: &dyn StoragePrimitives,
    budget: &CacheBudget,
    required: u64,
) -> EvictionReport {
    let mut report = EvictionReport::default();

    while needs_eviction(index, budget, required) {
        let Some(victim) = index.eviction_candidate().map(str::to_owned) else {
            log::debug!(
                "Cache empty, admitting {} bytes over a {} byte budget",
                required,
                budget.max_total_bytes
            );
            break;
        };

        match remove_entry(index, storage, &victim, RemovalCause::Eviction) {
            Some(entry) => {
                report.freed_bytes = report.freed_bytes.saturating_add(entry.size_bytes);
                report.evicted.push(victim);
            }
            None => break,
        }
    }

    if !report.is_empty() {
        log::info!(
            "Evicted {} entries ({} bytes) to admit {} bytes",
            report.evicted.len(),
            report.freed_bytes,
            required
        );
    }

    report
}
