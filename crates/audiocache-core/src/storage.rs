//! Storage primitives consumed by the cache engine.
//!
//! The engine never touches the filesystem or the network directly. Hosts (and
//! the SDK's `FsStorage`) implement [`StoragePrimitives`]; tests can swap in
//! an in-memory fake.

use std::path::{Path, PathBuf};

use crate::error::CacheResult;

/// Result of a successful `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size_bytes: u64,
}

/// Byte-level storage operations.
pub trait StoragePrimitives: Send + Sync {
    /// Downloads `url` into a temporary location and returns its path.
    fn download(&self, url: &str) -> CacheResult<PathBuf>;

    /// Size of the file at `path`, or `None` if it does not exist.
    fn stat(&self, path: &Path) -> Option<FileStat>;

    /// Copies `src` to `dst`, replacing `dst` if present.
    fn copy(&self, src: &Path, dst: &Path) -> CacheResult<()>;

    /// Deletes the file at `path`.
    ///
    /// Callers in the engine treat this as best-effort: a failure is logged and
    /// the metadata removal goes ahead anyway.
    fn delete(&self, path: &Path) -> CacheResult<()>;

    /// Where the backing file for `key` lives.
    fn storage_path(&self, key: &str) -> PathBuf;

    /// Moves a downloaded file into place: copy, then best-effort removal of
    /// the source.
    fn move_file(&self, src: &Path, dst: &Path) -> CacheResult<()> {
        self.copy(src, dst)?;
        if let Err(err) = self.delete(src) {
            log::debug!("Leaving temp file {} behind: {}", src.display(), err);
        }
        Ok(())
    }
}
