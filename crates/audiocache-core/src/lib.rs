//! Audio cache core - the storage-agnostic engine behind the local audio cache.
//!
//! This crate owns the cache's data model and every algorithm that mutates it:
//!
//! - [`CacheKey`]: stable file-safe keys derived from source URLs
//! - [`CacheIndex`]: entry metadata plus the running size total, persisted via
//!   an [`IndexStore`]
//! - [`eviction`]: priority-weighted recency eviction and the shared removal
//!   primitive
//! - [`maintenance`]: TTL sweeping and storage reconciliation
//!
//! It performs no I/O of its own. Bytes move through a [`StoragePrimitives`]
//! implementation and time comes from a [`Clock`], both supplied by the host
//! (see the `audiocache-sdk` crate for the filesystem/HTTP implementations).
//!
//! # Architecture
//!
//! ```text
//! AudioCacheManager (sdk)
//!     ├─► CacheIndex ──► IndexStore (persist/load)
//!     ├─► eviction::ensure_space ─┐
//!     ├─► maintenance::{sweep_expired, reconcile}
//!     └─► StoragePrimitives ◄─────┘  (download, stat, copy, delete)
//! ```

pub mod budget;
pub mod clock;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod http;
pub mod index;
pub mod key;
pub mod maintenance;
pub mod storage;

pub use budget::CacheBudget;
pub use clock::{Clock, ManualClock, SystemClock, DAY_MS};
pub use entry::{CacheEntry, Priority};
pub use error::{CacheError, CacheResult};
pub use eviction::{ensure_space, remove_entry, EvictionReport, RemovalCause};
pub use index::{CacheIndex, IndexStore, JsonFileIndexStore, MemoryIndexStore};
pub use key::CacheKey;
pub use maintenance::{reconcile, sweep_expired, ReconcileMode, ReconcileReport, SizeCorrection};
pub use storage::{FileStat, StoragePrimitives};
