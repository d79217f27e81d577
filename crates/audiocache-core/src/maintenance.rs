//! Expiration sweeper and integrity reconciler.
//!
//! Both passes repair the index against time and against the backing store.
//! When metadata and storage disagree, storage wins: a missing file drops its
//! entry, and a size mismatch rewrites the recorded size.

use crate::eviction::{remove_entry, RemovalCause};
use crate::index::CacheIndex;
use crate::storage::StoragePrimitives;

/// Removes every entry older than `ttl_ms` and stamps `last_clean_time`.
///
/// The timestamp is updated even when nothing expired. Returns the removed
/// keys.
pub fn sweep_expired(
    index: &mut CacheIndex,
    storage: &dyn StoragePrimitives,
    ttl_ms: u64,
    now_ms: u64,
) -> Vec<String> {
    let expired: Vec<String> = index
        .entries()
        .iter()
        .filter(|(_, entry)| entry.age_ms(now_ms) > ttl_ms)
        .map(|(key, _)| key.clone())
        .collect();

    let mut removed = Vec::with_capacity(expired.len());
    for key in expired {
        if remove_entry(index, storage, &key, RemovalCause::Expired).is_some() {
            removed.push(key);
        }
    }

    if !removed.is_empty() {
        log::info!("Expired {} cached files", removed.len());
    }

    index.set_last_clean_time(now_ms);
    removed
}

/// Which path to check for each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Trust each entry's recorded `storage_path`.
    Passive,
    /// Re-derive each path from its key and repoint entries that moved.
    Rebuild,
}

/// A recorded size that did not match storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeCorrection {
    pub key: String,
    pub recorded: u64,
    pub actual: u64,
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries whose backing file was missing.
    pub dropped: Vec<String>,
    pub resized: Vec<SizeCorrection>,
    /// Entries repointed to their derived path (rebuild only).
    pub relocated: Vec<String>,
    pub total_before: u64,
    pub total_after: u64,
}

impl ReconcileReport {
    /// True when the pass had to change anything, including a drifted total.
    pub fn diverged(&self) -> bool {
        !self.dropped.is_empty()
            || !self.resized.is_empty()
            || !self.relocated.is_empty()
            || self.total_before != self.total_after
    }
}

/// Cross-checks every entry against storage and recomputes the total from
/// scratch.
///
/// Entries are dropped from metadata only: a missing file has nothing to
/// delete.
pub fn reconcile(
    index: &mut CacheIndex,
    storage: &dyn StoragePrimitives,
    mode: ReconcileMode,
) -> ReconcileReport {
    let mut report = ReconcileReport {
        total_before: index.total_size_bytes(),
        ..Default::default()
    };

    for key in index.keys() {
        let Some(entry) = index.get_mut(&key) else {
            continue;
        };

        if mode == ReconcileMode::Rebuild {
            let derived = storage.storage_path(&key);
            if derived != entry.storage_path {
                entry.storage_path = derived;
                report.relocated.push(key.clone());
            }
        }

        match storage.stat(&entry.storage_path) {
            Some(stat) => {
                if stat.size_bytes != entry.size_bytes {
                    report.resized.push(SizeCorrection {
                        key: key.clone(),
                        recorded: entry.size_bytes,
                        actual: stat.size_bytes,
                    });
                    entry.size_bytes = stat.size_bytes;
                }
            }
            None => {
                log::info!("Cached file for '{}' is gone, dropping its record", key);
                index.remove(&key);
                report.relocated.retain(|k| k != &key);
                report.dropped.push(key);
            }
        }
    }

    report.total_after = index.recompute_total();

    if report.diverged() {
        log::warn!(
            "Cache metadata reconciled: {} dropped, {} resized, {} relocated, total {} -> {} bytes",
            report.dropped.len(),
            report.resized.len(),
            report.relocated.len(),
            report.total_before,
            report.total_after
        );
    }

    report
}
