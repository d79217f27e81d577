#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use audiocache_sdk::remote::{ClientCacheInfo, IntegrityCacheInfo};
use audiocache_sdk::{
    AudioCacheManager, CacheComponents, CacheConfig, Fetcher, FsStorage, IntegrityReport,
    JsonFileIndexStore, ManualClock, RemoteAuthority, SyncAction, SyncManifest,
};
use tempfile::TempDir;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const START_MS: u64 = 1_700_000_000_000;

/// Fetcher that writes `size` zero bytes per URL (default 10) and counts calls.
#[derive(Default)]
pub struct FakeFetcher {
    sizes: Mutex<HashMap<String, u64>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_size(&self, url: &str, size: u64) {
        self.sizes.lock().unwrap().insert(url.to_string(), size);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> anyhow::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = *self.delay.lock().unwrap() {
            std::thread::sleep(delay);
        }
        if self.failing.lock().unwrap().contains(url) {
            fs::write(dest, b"partial")?;
            anyhow::bail!("{} unreachable", url);
        }
        let size = self.sizes.lock().unwrap().get(url).copied().unwrap_or(10);
        fs::write(dest, vec![0u8; size as usize])?;
        Ok(size)
    }
}

/// Remote authority returning a scripted manifest. Calls can be held open with
/// [`ScriptedRemote::hold`] until [`ScriptedRemote::release`].
pub struct ScriptedRemote {
    manifest: Mutex<SyncManifest>,
    failure: Mutex<Option<String>>,
    uploads: Mutex<Vec<ClientCacheInfo>>,
    entered: AtomicUsize,
    held: Mutex<bool>,
    released: Condvar,
}

impl ScriptedRemote {
    pub fn new(actions: Vec<SyncAction>) -> Arc<Self> {
        Arc::new(Self {
            manifest: Mutex::new(SyncManifest {
                actions,
                ..Default::default()
            }),
            failure: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            held: Mutex::new(false),
            released: Condvar::new(),
        })
    }

    pub fn set_manifest(&self, manifest: SyncManifest) {
        *self.manifest.lock().unwrap() = manifest;
    }

    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }

    pub fn hold(&self) {
        *self.held.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    /// Number of manifest round-trips started.
    pub fn round_trips(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn wait_for_round_trips(&self, n: usize) {
        for _ in 0..500 {
            if self.round_trips() >= n {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("remote never saw {} round trips", n);
    }

    pub fn last_upload(&self) -> Option<ClientCacheInfo> {
        self.uploads.lock().unwrap().last().cloned()
    }
}

impl RemoteAuthority for ScriptedRemote {
    fn sync_manifest(&self, info: &ClientCacheInfo) -> anyhow::Result<SyncManifest> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.uploads.lock().unwrap().push(info.clone());

        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
        drop(held);

        if let Some(reason) = self.failure.lock().unwrap().clone() {
            anyhow::bail!(reason);
        }
        Ok(self.manifest.lock().unwrap().clone())
    }

    fn validate_integrity(&self, _info: &IntegrityCacheInfo) -> anyhow::Result<IntegrityReport> {
        Ok(IntegrityReport {
            is_valid: true,
            ..Default::default()
        })
    }
}

/// A manager over a real directory, a fake fetcher, and a manual clock.
pub struct Fixture {
    pub dir: TempDir,
    pub fetcher: Arc<FakeFetcher>,
    pub clock: Arc<ManualClock>,
    pub remote: Option<Arc<ScriptedRemote>>,
    pub manager: AudioCacheManager,
}

impl Fixture {
    pub fn new(configure: impl FnOnce(CacheConfig) -> CacheConfig) -> Self {
        Self::build(configure, None)
    }

    pub fn with_remote(
        configure: impl FnOnce(CacheConfig) -> CacheConfig,
        remote: Arc<ScriptedRemote>,
    ) -> Self {
        Self::build(configure, Some(remote))
    }

    fn build(
        configure: impl FnOnce(CacheConfig) -> CacheConfig,
        remote: Option<Arc<ScriptedRemote>>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let fetcher = FakeFetcher::new();
        let clock = Arc::new(ManualClock::new(START_MS));
        let config = configure(CacheConfig::new(dir.path().join("audio")));
        let manager = open(&config, fetcher.clone(), clock.clone(), remote.clone());

        Self {
            dir,
            fetcher,
            clock,
            remote,
            manager,
        }
    }

    /// Opens a second manager over the same directory, as a restarted process
    /// would.
    pub fn reopen(&self) -> AudioCacheManager {
        open(
            self.manager.config(),
            self.fetcher.clone(),
            self.clock.clone(),
            self.remote.clone(),
        )
    }
}

pub fn open(
    config: &CacheConfig,
    fetcher: Arc<FakeFetcher>,
    clock: Arc<ManualClock>,
    remote: Option<Arc<ScriptedRemote>>,
) -> AudioCacheManager {
    let storage = FsStorage::new(&config.cache_dir, fetcher).unwrap();
    let mut components = CacheComponents::new(
        Arc::new(storage),
        Arc::new(JsonFileIndexStore::new(config.index_path())),
    )
    .with_clock(clock);
    if let Some(remote) = remote {
        components = components.with_remote(remote);
    }
    AudioCacheManager::with_components(config.clone(), components)
}
