//! Filesystem storage and HTTP fetching.
//!
//! [`FsStorage`] implements the engine's [`StoragePrimitives`] on a local
//! directory. Downloads land in `{root}/.tmp` under a random name and are moved
//! into place by the manager once admission succeeds. The network side sits
//! behind the [`Fetcher`] trait so tests (and hosts with their own HTTP stack)
//! can replace it.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use audiocache_core::http::{with_retry, RetryPolicy};
use audiocache_core::key::file_name_for;
use audiocache_core::{CacheError, CacheResult, FileStat, StoragePrimitives};
use uuid::Uuid;

const TEMP_DIR_NAME: &str = ".tmp";
const PARTIAL_SUFFIX: &str = "part";

/// Fetches the bytes behind a URL into a local file.
pub trait Fetcher: Send + Sync {
    /// Writes the body of `url` to `dest` and returns the number of bytes
    /// written. On error `dest` may hold a partial file; the caller removes it.
    fn fetch(&self, url: &str, dest: &Path) -> anyhow::Result<u64>;
}

/// Blocking HTTP fetcher with retry on transient failures.
pub struct HttpFetcher {
    agent: ureq::Agent,
    retry_policy: RetryPolicy,
    timeout_ms: u64,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Duration, download_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout(download_timeout)
            .build();

        Self {
            agent,
            retry_policy: RetryPolicy::default(),
            timeout_ms: download_timeout.as_millis() as u64,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// One download attempt.
    fn try_download(&self, url: &str, dest: &Path) -> CacheResult<u64> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| self.ureq_error_to_cache_error(e, url))?;

        if response.status() != 200 {
            return Err(status_to_error(response.status(), url));
        }

        let mut file = File::create(dest)?;
        let mut reader = response.into_reader();
        let mut buffer = [0u8; 8192];
        let mut downloaded: u64 = 0;

        loop {
            let bytes_read = reader.read(&mut buffer).map_err(|e| self.read_error(e, url))?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])?;
            downloaded += bytes_read as u64;
        }

        file.flush()?;
        Ok(downloaded)
    }

    fn read_error(&self, error: io::Error, url: &str) -> CacheError {
        if error.kind() == io::ErrorKind::TimedOut {
            CacheError::Timeout {
                timeout_ms: self.timeout_ms,
            }
        } else {
            CacheError::Network(format!("Read error downloading {}: {}", url, error))
        }
    }

    fn ureq_error_to_cache_error(&self, error: ureq::Error, url: &str) -> CacheError {
        match error {
            ureq::Error::Status(status, _) => status_to_error(status, url),
            ureq::Error::Transport(transport) => match transport.kind() {
                ureq::ErrorKind::Dns => {
                    CacheError::Network(format!("Failed to fetch {} (DNS resolution failed)", url))
                }
                ureq::ErrorKind::ConnectionFailed => {
                    CacheError::Network(format!("Failed to fetch {} (connection failed)", url))
                }
                ureq::ErrorKind::Io => CacheError::Network(format!(
                    "Failed to fetch {} (I/O error: {})",
                    url,
                    transport.message().unwrap_or("unknown")
                )),
                ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                    CacheError::Download(format!("Invalid audio URL {}", url))
                }
                _ => CacheError::Network(format!("Failed to fetch {}: {}", url, transport)),
            },
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> anyhow::Result<u64> {
        let result = with_retry(
            &self.retry_policy,
            |attempt| {
                if attempt > 0 {
                    log::debug!("Retrying download of {} (attempt {})", url, attempt + 1);
                }
                self.try_download(url, dest)
            },
            |err| {
                log::warn!("Download of {} failed, will retry: {}", url, err);
                fs::remove_file(dest).ok();
            },
        );

        result
            .into_result()
            .with_context(|| format!("GET {}", url))
    }
}

/// Maps an HTTP status to a cache error. 429 and server errors are transient;
/// other client errors are permanent.
fn status_to_error(status: u16, url: &str) -> CacheError {
    match status {
        429 => CacheError::RateLimited {
            retry_after_secs: 60,
        },
        500..=599 => CacheError::Network(format!(
            "Fetching {} failed with status {} (server error)",
            url, status
        )),
        400..=499 => CacheError::Download(format!(
            "Fetching {} failed with status {} (client error)",
            url, status
        )),
        _ => CacheError::Network(format!("Fetching {} returned status {}", url, status)),
    }
}

/// Cache storage on a local directory.
pub struct FsStorage {
    root: PathBuf,
    temp_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl FsStorage {
    /// Opens (creating if needed) the cache directory at `root`.
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> CacheResult<Self> {
        let root = root.into();
        let temp_dir = root.join(TEMP_DIR_NAME);
        fs::create_dir_all(&temp_dir)?;

        Ok(Self {
            root,
            temp_dir,
            fetcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deletes partial downloads left behind by an interrupted process.
    /// Returns how many were removed.
    pub fn purge_partial_downloads(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.temp_dir) else {
            return 0;
        };

        let mut purged = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(PARTIAL_SUFFIX)
                && fs::remove_file(&path).is_ok()
            {
                purged += 1;
            }
        }

        if purged > 0 {
            log::info!("Removed {} partial downloads from {}", purged, self.temp_dir.display());
        }
        purged
    }

    fn temp_path(&self) -> PathBuf {
        self.temp_dir
            .join(format!("{}.{}", Uuid::new_v4(), PARTIAL_SUFFIX))
    }
}

impl StoragePrimitives for FsStorage {
    fn download(&self, url: &str) -> CacheResult<PathBuf> {
        let dest = self.temp_path();
        match self.fetcher.fetch(url, &dest) {
            Ok(bytes) => {
                log::debug!("Downloaded {} bytes from {}", bytes, url);
                Ok(dest)
            }
            Err(err) => {
                fs::remove_file(&dest).ok();
                Err(CacheError::Download(format!("{:#}", err)))
            }
        }
    }

    fn stat(&self, path: &Path) -> Option<FileStat> {
        fs::metadata(path)
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| FileStat {
                size_bytes: meta.len(),
            })
    }

    fn copy(&self, src: &Path, dst: &Path) -> CacheResult<()> {
        fs::copy(src, dst).map_err(|e| {
            CacheError::Storage(format!(
                "copy {} -> {}: {}",
                src.display(),
                dst.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn delete(&self, path: &Path) -> CacheResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Storage(format!("delete {}: {}", path.display(), e))),
        }
    }

    fn storage_path(&self, key: &str) -> PathBuf {
        self.root.join(file_name_for(key))
    }

    fn move_file(&self, src: &Path, dst: &Path) -> CacheResult<()> {
        // The temp dir lives under the root, so a rename normally works.
        if fs::rename(src, dst).is_ok() {
            return Ok(());
        }

        self.copy(src, dst)?;
        if let Err(err) = self.delete(src) {
            log::debug!("Leaving temp file {} behind: {}", src.display(), err);
        }
        Ok(())
    }
}
