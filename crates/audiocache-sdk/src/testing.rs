//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use audiocache_core::key::file_name_for;
use audiocache_core::{
    CacheBudget, CacheError, CacheResult, FileStat, ManualClock, MemoryIndexStore,
    StoragePrimitives,
};

use crate::remote::{
    ClientCacheInfo, IntegrityCacheInfo, IntegrityReport, RemoteAuthority, SyncAction,
    SyncManifest,
};
use crate::state::CacheState;

pub(crate) const DEFAULT_DOWNLOAD_SIZE: u64 = 10;

/// Storage whose files are a path -> size map. Downloads produce files of a
/// per-URL size (default [`DEFAULT_DOWNLOAD_SIZE`]).
#[derive(Default)]
pub(crate) struct MemStorage {
    files: Mutex<HashMap<PathBuf, u64>>,
    sizes: Mutex<HashMap<String, u64>>,
    failing: Mutex<HashSet<String>>,
    downloads: AtomicUsize,
}

impl MemStorage {
    pub(crate) fn set_size(&self, url: &str, size: u64) {
        self.sizes.lock().unwrap().insert(url.to_string(), size);
    }

    pub(crate) fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Places a file for `key` at its storage path.
    pub(crate) fn put(&self, key: &str, size: u64) -> PathBuf {
        let path = self.storage_path(key);
        self.files.lock().unwrap().insert(path.clone(), size);
        path
    }

    pub(crate) fn exists(&self, key: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .contains_key(&self.storage_path(key))
    }

    pub(crate) fn wipe(&self, key: &str) {
        let path = self.storage_path(key);
        self.files.lock().unwrap().remove(&path);
    }

    pub(crate) fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub(crate) fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

impl StoragePrimitives for MemStorage {
    fn download(&self, url: &str) -> CacheResult<PathBuf> {
        if self.failing.lock().unwrap().contains(url) {
            return Err(CacheError::Download(format!("{}: unreachable", url)));
        }
        let n = self.downloads.fetch_add(1, Ordering::SeqCst);
        let size = self
            .sizes
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(DEFAULT_DOWNLOAD_SIZE);
        let path = PathBuf::from(format!("/tmp/download-{}", n));
        self.files.lock().unwrap().insert(path.clone(), size);
        Ok(path)
    }

    fn stat(&self, path: &Path) -> Option<FileStat> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|size| FileStat { size_bytes: *size })
    }

    fn copy(&self, src: &Path, dst: &Path) -> CacheResult<()> {
        let mut files = self.files.lock().unwrap();
        let size = *files
            .get(src)
            .ok_or_else(|| CacheError::Storage(format!("{} missing", src.display())))?;
        files.insert(dst.to_path_buf(), size);
        Ok(())
    }

    fn delete(&self, path: &Path) -> CacheResult<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn storage_path(&self, key: &str) -> PathBuf {
        PathBuf::from("/cache").join(file_name_for(key))
    }
}

/// Remote authority that returns a fixed manifest and records uploads.
pub(crate) struct MockRemote {
    manifest: SyncManifest,
    failure: Option<String>,
    integrity: IntegrityReport,
    uploads: Mutex<Vec<ClientCacheInfo>>,
}

impl MockRemote {
    pub(crate) fn new(manifest: SyncManifest) -> Arc<Self> {
        Arc::new(Self {
            manifest,
            failure: None,
            integrity: IntegrityReport {
                is_valid: true,
                ..Default::default()
            },
            uploads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_actions(actions: Vec<SyncAction>) -> Arc<Self> {
        Self::new(SyncManifest {
            actions,
            ..Default::default()
        })
    }

    pub(crate) fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            manifest: SyncManifest::default(),
            failure: Some(reason.to_string()),
            integrity: IntegrityReport::default(),
            uploads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn with_integrity(report: IntegrityReport) -> Arc<Self> {
        Arc::new(Self {
            manifest: SyncManifest::default(),
            failure: None,
            integrity: report,
            uploads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn last_manifest(&self) -> Option<ClientCacheInfo> {
        self.uploads.lock().unwrap().last().cloned()
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

impl RemoteAuthority for MockRemote {
    fn sync_manifest(&self, info: &ClientCacheInfo) -> anyhow::Result<SyncManifest> {
        self.uploads.lock().unwrap().push(info.clone());
        match &self.failure {
            Some(reason) => Err(anyhow::anyhow!("{}", reason)),
            None => Ok(self.manifest.clone()),
        }
    }

    fn validate_integrity(&self, _info: &IntegrityCacheInfo) -> anyhow::Result<IntegrityReport> {
        match &self.failure {
            Some(reason) => Err(anyhow::anyhow!("{}", reason)),
            None => Ok(self.integrity.clone()),
        }
    }
}

/// Fresh state over [`MemStorage`] and a [`ManualClock`] set to `now_ms`.
pub(crate) fn state_with(now_ms: u64) -> (CacheState, Arc<MemStorage>, Arc<ManualClock>) {
    let storage = Arc::new(MemStorage::default());
    let clock = Arc::new(ManualClock::new(now_ms));
    let state = CacheState::load(
        CacheBudget::default(),
        storage.clone(),
        Arc::new(MemoryIndexStore::new()),
        clock.clone(),
    );
    (state, storage, clock)
}
