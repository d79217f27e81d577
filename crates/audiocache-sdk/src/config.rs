//! Cache configuration.
//!
//! ```rust,no_run
//! use audiocache_sdk::CacheConfig;
//! use std::time::Duration;
//!
//! let config = CacheConfig::default()
//!     .with_cache_dir("/var/lib/player/audio")
//!     .with_max_total_bytes(256 * 1024 * 1024)
//!     .with_remote_url("https://api.example.com")
//!     .with_sync_interval(Duration::from_secs(600));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use audiocache_core::{CacheBudget, CacheError, CacheResult};

/// File name of the persisted index inside the cache directory.
pub const INDEX_FILE_NAME: &str = "audio_cache_info.json";

/// Default interval between background expiry sweeps (24 hours).
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

pub const ENV_CACHE_DIR: &str = "AUDIOCACHE_DIR";
pub const ENV_MAX_BYTES: &str = "AUDIOCACHE_MAX_BYTES";
pub const ENV_MAX_FILES: &str = "AUDIOCACHE_MAX_FILES";
pub const ENV_TTL_SECS: &str = "AUDIOCACHE_TTL_SECS";
pub const ENV_SYNC_INTERVAL_SECS: &str = "AUDIOCACHE_SYNC_INTERVAL_SECS";
pub const ENV_REMOTE_URL: &str = "AUDIOCACHE_REMOTE_URL";
pub const ENV_AUTH_TOKEN: &str = "AUDIOCACHE_AUTH_TOKEN";

/// Configuration for an [`AudioCacheManager`](crate::AudioCacheManager).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding cached files and the persisted index.
    pub cache_dir: PathBuf,
    pub budget: CacheBudget,
    /// Whether to sync with the remote authority. Only takes effect when
    /// `remote_url` is set.
    pub sync_enabled: bool,
    /// Base URL of the remote authority (e.g. `https://api.example.com/v1`).
    pub remote_url: Option<String>,
    /// Bearer token sent with remote-authority requests.
    pub auth_token: Option<String>,
    /// How often the background scheduler re-runs the expiry sweep.
    pub clean_interval: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            budget: CacheBudget::default(),
            sync_enabled: true,
            remote_url: None,
            auth_token: None,
            clean_interval: DEFAULT_CLEAN_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

impl CacheConfig {
    /// Creates a config rooted at `cache_dir` with default limits.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::default().with_cache_dir(cache_dir)
    }

    /// Builds a config from `AUDIOCACHE_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> CacheResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> CacheResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(bytes) = parse_var::<u64>(&lookup, ENV_MAX_BYTES)? {
            config.budget.max_total_bytes = bytes;
        }
        if let Some(files) = parse_var::<usize>(&lookup, ENV_MAX_FILES)? {
            config.budget.max_entry_count = files;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_TTL_SECS)? {
            config.budget.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_SYNC_INTERVAL_SECS)? {
            config.budget.sync_interval = Duration::from_secs(secs);
        }
        config.remote_url = lookup(ENV_REMOTE_URL).filter(|url| !url.trim().is_empty());
        config.auth_token = lookup(ENV_AUTH_TOKEN).filter(|token| !token.is_empty());

        Ok(config)
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_budget(mut self, budget: CacheBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_max_total_bytes(mut self, bytes: u64) -> Self {
        self.budget.max_total_bytes = bytes;
        self
    }

    pub fn with_max_entry_count(mut self, count: usize) -> Self {
        self.budget.max_entry_count = count;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.budget.ttl = ttl;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.budget.sync_interval = interval;
        self
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    pub fn with_clean_interval(mut self, interval: Duration) -> Self {
        self.clean_interval = interval;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration, download: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self.download_timeout = download;
        self
    }

    /// Path of the persisted index.
    pub fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE_NAME)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// True when sync is enabled and there is somewhere to sync with.
    pub fn sync_active(&self) -> bool {
        self.sync_enabled && self.remote_url.is_some()
    }
}

/// Platform cache directory: `{cache_dir}/audiocache/audio`, or
/// `~/.audiocache/audio` where the platform has no cache directory.
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("audiocache").join("audio"))
        .or_else(|| dirs::home_dir().map(|home| home.join(".audiocache").join("audio")))
        .unwrap_or_else(|| PathBuf::from(".audiocache").join("audio"))
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> CacheResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::Config(format!("{}={:?}: {}", name, raw, e))),
    }
}
