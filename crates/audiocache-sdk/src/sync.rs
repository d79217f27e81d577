//! Sync client: manifest upload and server action execution.
//!
//! The client is Idle or Syncing. A cycle that starts while another is in
//! flight is dropped with [`SyncOutcome::Skipped`], never queued. Network
//! failures end the cycle quietly; the next scheduled interval is the retry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use audiocache_core::{remove_entry, CacheIndex, RemovalCause, StoragePrimitives};

use crate::error::{SyncError, SyncResult};
use crate::remote::{
    ClientCacheInfo, IntegrityCacheInfo, IntegrityReport, RemoteAuthority, SyncAction,
    SyncActionKind,
};
use crate::state::CacheState;
use crate::stats::SyncStats;

/// `consider_remove` drops an entry idle for longer than this many days, even
/// when it is high priority.
pub const CONSIDER_REMOVE_IDLE_DAYS: u64 = 14;

/// Result of one sync attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another cycle was already in flight.
    Skipped,
    /// No remote authority is configured.
    Disabled,
    /// The round-trip failed; local state is unchanged.
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// What a completed cycle did locally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Well-formed entries in `actions`.
    pub actions_received: usize,
    /// Well-formed entries in `server_recommendations`.
    pub recommendations_received: usize,
    /// Keys removed by `remove` or `consider_remove`.
    pub removed: Vec<String>,
    pub marked_stale: Vec<String>,
    /// Keys a `consider_remove` decided to keep.
    pub kept: Vec<String>,
    /// Prefetch hints, left for a higher-level scheduler.
    pub prefetch_hints: Vec<SyncAction>,
    /// Entries skipped as received: unknown action kinds and entries that
    /// failed to parse.
    pub ignored: Vec<serde_json::Value>,
}

pub(crate) struct SyncClient {
    remote: Option<Arc<dyn RemoteAuthority>>,
    in_flight: AtomicBool,
    last_attempt_ms: AtomicU64,
    last_success_ms: AtomicU64,
    sync_count: AtomicU64,
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncClient {
    pub(crate) fn new(remote: Option<Arc<dyn RemoteAuthority>>) -> Self {
        Self {
            remote,
            in_flight: AtomicBool::new(false),
            last_attempt_ms: AtomicU64::new(0),
            last_success_ms: AtomicU64::new(0),
            sync_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub(crate) fn in_progress(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// True when the interval since the last attempt has passed and the
    /// client is idle.
    pub(crate) fn is_due(&self, now_ms: u64, interval_ms: u64) -> bool {
        self.is_enabled()
            && !self.in_progress()
            && now_ms.saturating_sub(self.last_attempt_ms.load(Ordering::Acquire)) > interval_ms
    }

    pub(crate) fn status(&self, now_ms: u64, interval_ms: u64) -> SyncStats {
        let last_attempt = self.last_attempt_ms.load(Ordering::Acquire);
        SyncStats {
            enabled: self.is_enabled(),
            last_sync_time: self.last_success_ms.load(Ordering::Acquire),
            last_attempt_time: last_attempt,
            sync_count: self.sync_count.load(Ordering::Acquire),
            sync_in_progress: self.in_progress(),
            next_sync_in_ms: self
                .is_enabled()
                .then(|| last_attempt.saturating_add(interval_ms).saturating_sub(now_ms)),
        }
    }

    fn begin(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(&self.in_flight))
    }

    /// Runs one cycle: upload the manifest, then apply `actions` in order and
    /// the `"high"` entries of `server_recommendations`.
    pub(crate) fn run(&self, state: &CacheState) -> SyncOutcome {
        let Some(remote) = &self.remote else {
            return SyncOutcome::Disabled;
        };
        let Some(_flight) = self.begin() else {
            log::debug!("Cache sync already in progress, skipping");
            return SyncOutcome::Skipped;
        };

        self.last_attempt_ms.store(state.now_ms(), Ordering::Release);

        let info = {
            let index = state.lock();
            ClientCacheInfo::from_index(
                &index,
                state.budget.max_total_bytes,
                state.budget.max_entry_count,
            )
        };
        log::info!(
            "Syncing cache manifest ({} files, {} bytes)",
            info.files.len(),
            info.total_size
        );

        let manifest = match remote.sync_manifest(&info) {
            Ok(manifest) => manifest,
            Err(err) => {
                let err = SyncError::from_remote(err);
                log::warn!("Cache sync failed: {}", err);
                return SyncOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let mut report = SyncReport {
            actions_received: manifest.actions.len(),
            recommendations_received: manifest.server_recommendations.len(),
            ignored: manifest.malformed.clone(),
            ..Default::default()
        };

        {
            let now = state.now_ms();
            let mut index = state.lock();
            let mut changed = false;

            let recommended = manifest
                .server_recommendations
                .iter()
                .filter(|rec| rec.is_high_priority());
            for action in manifest.actions.iter().chain(recommended) {
                changed |= apply_action(&mut index, state.storage.as_ref(), action, now, &mut report);
            }

            if changed {
                state.persist(&index);
            }
        }

        self.last_success_ms.store(state.now_ms(), Ordering::Release);
        self.sync_count.fetch_add(1, Ordering::AcqRel);

        log::info!(
            "Cache sync complete: {} removed, {} stale, {} kept, {} prefetch hints, {} ignored",
            report.removed.len(),
            report.marked_stale.len(),
            report.kept.len(),
            report.prefetch_hints.len(),
            report.ignored.len()
        );
        SyncOutcome::Completed(report)
    }

    /// Asks the remote authority to validate the local view.
    pub(crate) fn validate(&self, state: &CacheState) -> SyncResult<IntegrityReport> {
        let remote = self.remote.as_ref().ok_or(SyncError::Disabled)?;
        let info = IntegrityCacheInfo::from_index(&state.lock());
        remote
            .validate_integrity(&info)
            .map_err(SyncError::from_remote)
    }
}

/// Applies one server action to the index. Returns true if the index changed.
fn apply_action(
    index: &mut CacheIndex,
    storage: &dyn StoragePrimitives,
    action: &SyncAction,
    now_ms: u64,
    report: &mut SyncReport,
) -> bool {
    let key = action.file_key.as_str();

    match action.kind() {
        Some(SyncActionKind::Remove) => {
            if remove_entry(index, storage, key, RemovalCause::Remote).is_some() {
                report.removed.push(key.to_string());
                true
            } else {
                log::debug!("Server asked to remove '{}', which is not cached", key);
                false
            }
        }
        Some(SyncActionKind::Update) => match index.get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                report.marked_stale.push(key.to_string());
                true
            }
            None => false,
        },
        Some(SyncActionKind::ConsiderRemove) => {
            let Some(entry) = index.get(key) else {
                return false;
            };
            let idle_days = entry.days_since_access(now_ms);
            if !entry.priority.is_high() || idle_days > CONSIDER_REMOVE_IDLE_DAYS {
                remove_entry(index, storage, key, RemovalCause::Remote);
                report.removed.push(key.to_string());
                true
            } else {
                log::debug!(
                    "Keeping '{}' (priority {}, idle {} days)",
                    key,
                    entry.priority.value(),
                    idle_days
                );
                report.kept.push(key.to_string());
                false
            }
        }
        Some(SyncActionKind::Prefetch) => {
            log::info!(
                "Server suggests prefetching '{}'{}",
                key,
                action
                    .reason
                    .as_deref()
                    .map(|r| format!(": {}", r))
                    .unwrap_or_default()
            );
            report.prefetch_hints.push(action.clone());
            false
        }
        None => {
            log::warn!("Ignoring unknown sync action '{}' for '{}'", action.action, key);
            report
                .ignored
                .push(serde_json::to_value(action).unwrap_or_default());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{state_with, MemStorage, MockRemote};
    use audiocache_core::{CacheEntry, Clock, Priority, DAY_MS};

    const NOW: u64 = 100 * DAY_MS;

    fn seed(state: &CacheState, storage: &MemStorage, key: &str, size: u64, priority: u32, idle_days: u64) {
        let path = storage.put(key, size);
        let mut entry = CacheEntry::admitted(key, path, size, Priority(priority), NOW - idle_days * DAY_MS);
        entry.last_accessed_at = NOW - idle_days * DAY_MS;
        state.lock().insert(key, entry);
    }

    #[test]
    fn test_disabled_without_remote() {
        let (state, _storage, _clock) = state_with(NOW);
        assert_eq!(SyncClient::new(None).run(&state), SyncOutcome::Disabled);
    }

    #[test]
    fn test_remove_action_drops_entry_and_size() {
        let (state, storage, _clock) = state_with(NOW);
        seed(&state, &storage, "K", 40, 1, 0);
        seed(&state, &storage, "other", 10, 1, 0);

        let remote = MockRemote::with_actions(vec![SyncAction::new("K", SyncActionKind::Remove)]);
        let client = SyncClient::new(Some(remote.clone()));

        let outcome = client.run(&state);
        let report = outcome.report().unwrap();
        assert_eq!(report.removed, vec!["K".to_string()]);

        let index = state.lock();
        assert!(!index.contains("K"));
        assert_eq!(index.total_size_bytes(), 10);
        assert!(!storage.exists("K"));
    }

    #[test]
    fn test_manifest_carries_budget() {
        let (state, storage, _clock) = state_with(NOW);
        seed(&state, &storage, "a", 5, 1, 0);

        let remote = MockRemote::with_actions(vec![]);
        SyncClient::new(Some(remote.clone())).run(&state);

        let uploaded = remote.last_manifest().unwrap();
        assert_eq!(uploaded.total_size, 5);
        assert_eq!(uploaded.max_size, state.budget.max_total_bytes);
        assert_eq!(uploaded.max_files, state.budget.max_entry_count);
        assert!(uploaded.files.contains_key("a"));
    }

    #[test]
    fn test_consider_remove_heuristic() {
        let (state, storage, _clock) = state_with(NOW);
        seed(&state, &storage, "low", 1, 1, 0);
        seed(&state, &storage, "high-fresh", 1, 3, 2);
        seed(&state, &storage, "high-idle", 1, 3, 15);

        let remote = MockRemote::with_actions(vec![
            SyncAction::new("low", SyncActionKind::ConsiderRemove),
            SyncAction::new("high-fresh", SyncActionKind::ConsiderRemove),
            SyncAction::new("high-idle", SyncActionKind::ConsiderRemove),
        ]);
        let outcome = SyncClient::new(Some(remote)).run(&state);
        let report = outcome.report().unwrap();

        assert_eq!(report.removed, vec!["low".to_string(), "high-idle".to_string()]);
        assert_eq!(report.kept, vec!["high-fresh".to_string()]);
        assert!(state.lock().contains("high-fresh"));
    }

    #[test]
    fn test_update_marks_stale_and_prefetch_is_advisory() {
        let (state, storage, _clock) = state_with(NOW);
        seed(&state, &storage, "u", 3, 1, 0);

        let remote = MockRemote::with_actions(vec![
            SyncAction::new("u", SyncActionKind::Update),
            SyncAction::new("p", SyncActionKind::Prefetch),
        ]);
        let outcome = SyncClient::new(Some(remote)).run(&state);
        let report = outcome.report().unwrap();

        assert_eq!(report.marked_stale, vec!["u".to_string()]);
        assert_eq!(report.prefetch_hints.len(), 1);
        let index = state.lock();
        assert!(index.get("u").unwrap().stale);
        assert!(!index.contains("p"));
        assert!(storage.exists("u"));
    }

    #[test]
    fn test_only_high_recommendations_run() {
        let (state, storage, _clock) = state_with(NOW);
        seed(&state, &storage, "r1", 1, 1, 0);
        seed(&state, &storage, "r2", 1, 1, 0);

        let remote = MockRemote::new(crate::remote::SyncManifest {
            actions: vec![],
            server_recommendations: vec![
                SyncAction::new("r1", SyncActionKind::Remove).with_priority("high"),
                SyncAction::new("r2", SyncActionKind::Remove).with_priority("low"),
            ],
            ..Default::default()
        });
        SyncClient::new(Some(remote)).run(&state);

        let index = state.lock();
        assert!(!index.contains("r1"));
        assert!(index.contains("r2"));
    }

    #[test]
    fn test_unknown_kind_is_skipped() {
        let (state, storage, _clock) = state_with(NOW);
        seed(&state, &storage, "x", 1, 1, 0);

        let mut odd = SyncAction::new("x", SyncActionKind::Remove);
        odd.action = "transcode".into();
        let remote = MockRemote::with_actions(vec![odd, SyncAction::new("x", SyncActionKind::Remove)]);
        let outcome = SyncClient::new(Some(remote)).run(&state);

        let report = outcome.report().unwrap();
        assert_eq!(report.ignored.len(), 1);
        assert_eq!(report.ignored[0]["action"], "transcode");
        assert_eq!(report.removed, vec!["x".to_string()]);
    }

    #[test]
    fn test_malformed_entries_are_reported_and_the_rest_applies() {
        let (state, storage, _clock) = state_with(NOW);
        seed(&state, &storage, "k", 1, 1, 0);
        seed(&state, &storage, "j", 3, 1, 0);

        let manifest: crate::remote::SyncManifest = serde_json::from_value(serde_json::json!({
            "actions": [
                {"file_key": "k", "action": "remove"},
                {"file_key": "j", "action": "consider_remove", "days_since_access": "soon"}
            ]
        }))
        .unwrap();
        let outcome = SyncClient::new(Some(MockRemote::new(manifest))).run(&state);

        let report = outcome.report().unwrap();
        assert_eq!(report.actions_received, 1);
        assert_eq!(report.removed, vec!["k".to_string()]);
        assert_eq!(report.ignored.len(), 1);
        assert_eq!(report.ignored[0]["file_key"], "j");
        let index = state.lock();
        assert!(!index.contains("k"));
        assert!(index.contains("j"));
    }

    #[test]
    fn test_failure_returns_to_idle_without_counting() {
        let (state, storage, clock) = state_with(NOW);
        seed(&state, &storage, "a", 1, 1, 0);

        let remote = MockRemote::failing("boom");
        let client = SyncClient::new(Some(remote));

        let outcome = client.run(&state);
        assert!(matches!(outcome, SyncOutcome::Failed { ref reason } if reason.contains("boom")));
        assert!(!client.in_progress());

        let status = client.status(clock.now_ms(), 1000);
        assert_eq!(status.sync_count, 0);
        assert_eq!(status.last_sync_time, 0);
        assert_eq!(status.last_attempt_time, NOW);
        assert!(state.lock().contains("a"));
    }

    #[test]
    fn test_due_tracks_last_attempt() {
        let (state, _storage, clock) = state_with(NOW);
        let client = SyncClient::new(Some(MockRemote::with_actions(vec![])));
        let interval = 5 * 60 * 1000;

        assert!(client.is_due(clock.now_ms(), interval));
        assert!(client.run(&state).is_completed());
        assert!(!client.is_due(clock.now_ms(), interval));

        clock.advance(std::time::Duration::from_millis(interval + 1));
        assert!(client.is_due(clock.now_ms(), interval));
        assert_eq!(client.status(clock.now_ms(), interval).sync_count, 1);
    }

    #[test]
    fn test_validate_requires_remote() {
        let (state, _storage, _clock) = state_with(NOW);
        assert!(matches!(SyncClient::new(None).validate(&state), Err(SyncError::Disabled)));
    }
}
