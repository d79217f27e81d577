//! HTTP helpers shared by the SDK's network-facing collaborators.
//!
//! ```rust,ignore
//! use audiocache_core::http::{with_retry, RetryPolicy};
//!
//! let result = with_retry(&RetryPolicy::default(), |_attempt| fetch(url), |_err| cleanup());
//! ```

mod retry;

pub use retry::{with_retry, RetryPolicy, RetryResult, RetryableError};
