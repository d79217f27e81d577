//! Process-wide cache limits.

use std::time::Duration;

/// Default byte budget (100 MiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 100 * 1024 * 1024;
/// Default entry budget.
pub const DEFAULT_MAX_ENTRY_COUNT: usize = 50;
/// Default time-to-live (7 days).
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Default interval between sync cycles (5 minutes).
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Capacity, expiry and sync cadence limits.
///
/// `max_total_bytes` is a soft limit: an admission that cannot be made to fit
/// by evicting everything else is still admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheBudget {
    pub max_total_bytes: u64,
    pub max_entry_count: usize,
    pub ttl: Duration,
    pub sync_interval: Duration,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            max_entry_count: DEFAULT_MAX_ENTRY_COUNT,
            ttl: DEFAULT_TTL,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

impl CacheBudget {
    pub fn with_max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    pub fn with_max_entry_count(mut self, count: usize) -> Self {
        self.max_entry_count = count;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl.as_millis() as u64
    }

    pub fn sync_interval_ms(&self) -> u64 {
        self.sync_interval.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let budget = CacheBudget::default();
        assert_eq!(budget.max_total_bytes, 104_857_600);
        assert_eq!(budget.max_entry_count, 50);
        assert_eq!(budget.ttl_ms(), 604_800_000);
        assert_eq!(budget.sync_interval_ms(), 300_000);
    }

    #[test]
    fn test_builder_overrides() {
        let budget = CacheBudget::default()
            .with_max_total_bytes(100)
            .with_max_entry_count(3)
            .with_ttl(Duration::from_secs(1))
            .with_sync_interval(Duration::from_millis(250));
        assert_eq!(budget.max_total_bytes, 100);
        assert_eq!(budget.max_entry_count, 3);
        assert_eq!(budget.ttl_ms(), 1_000);
        assert_eq!(budget.sync_interval_ms(), 250);
    }
}
