//! Retry with exponential backoff and jitter for transient download failures.

use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_DELAY_MS: u32 = 2000;
const DEFAULT_MAX_DELAY_MS: u32 = 60000;
const DEFAULT_JITTER_FACTOR: f32 = 0.5;

/// Configuration for retry behavior.
///
/// The default is deliberately conservative: audio hosts are usually CDNs,
/// and a download that keeps failing should surface to the caller quickly.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u32,
    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u32,
    /// Jitter factor (0.0 to 1.0): delay is randomized by +/- (factor * delay).
    pub jitter_factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Delay before attempt `attempt` (0-indexed).
    ///
    /// `initial_delay * 2^(attempt - 1)`, capped at `max_delay`, then jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay_ms = self
            .initial_delay_ms
            .saturating_mul(1 << (attempt - 1).min(10));
        let capped_delay_ms = base_delay_ms.min(self.max_delay_ms);

        let final_delay_ms = if self.jitter_factor > 0.0 {
            let jitter_range = (capped_delay_ms as f32 * self.jitter_factor) as u32;
            let jitter = random_u32() % (jitter_range * 2 + 1);
            capped_delay_ms
                .saturating_sub(jitter_range)
                .saturating_add(jitter)
        } else {
            capped_delay_ms
        };

        Duration::from_millis(final_delay_ms as u64)
    }
}

/// Errors that know whether another attempt could succeed.
pub trait RetryableError {
    /// True for transient failures: rate limiting, gateway errors, timeouts,
    /// DNS and connection failures. Client errors (4xx other than 429) are
    /// permanent.
    fn is_retryable(&self) -> bool;

    /// Server-requested delay (`Retry-After`), if any.
    fn retry_after(&self) -> Option<Duration>;
}

/// Outcome of [`with_retry`].
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Failed with a non-retryable error.
    Failure(E),
    /// Every attempt failed with a retryable error.
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    /// Collapses into a plain `Result`, reporting the last error on exhaustion.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::Failure(e) => Err(e),
            RetryResult::Exhausted { last_error, .. } => Err(last_error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy runs
/// out of attempts. `cleanup` runs after every retryable failure (e.g. to
/// remove a partial download).
pub fn with_retry<T, E, F, C>(
    policy: &RetryPolicy,
    mut operation: F,
    mut cleanup: C,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    C: FnMut(&E),
    E: RetryableError,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation(attempt) {
            Ok(result) => return RetryResult::Success(result),
            Err(err) if !err.is_retryable() => return RetryResult::Failure(err),
            Err(err) => err,
        };

        cleanup(&err);
        attempt += 1;
        if attempt >= attempts {
            return RetryResult::Exhausted {
                last_error: err,
                attempts,
            };
        }

        let delay = err
            .retry_after()
            .unwrap_or_else(|| policy.delay_for_attempt(attempt));
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Xorshift PRNG for jitter. Not cryptographic.
fn random_u32() -> u32 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u32> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u32 | 1)
                .unwrap_or(12345)
        );
    }

    STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state.set(x);
        x
    })
}
