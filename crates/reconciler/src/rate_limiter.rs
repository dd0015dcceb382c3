//! Per-key retry delays.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Default delay for the first failure of a key.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(5);

/// Default ceiling on the delay for a key.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1000);

/// Decides how long a failing key waits before it is retried.
///
/// Called only while the work queue holds its lock, so implementations need
/// no synchronisation of their own.
pub trait RateLimiter<K>: Send {
    /// Record a failure for `key` and return how long it should wait.
    fn when(&mut self, key: &K) -> Duration;

    /// Drop all history for `key`.
    fn forget(&mut self, key: &K);

    /// Number of failures recorded for `key` since the last `forget`.
    fn num_requeues(&self, key: &K) -> u32;
}

/// Calculate exponential backoff duration.
///
/// `base * 2^attempt`, capped at `max`.
#[must_use]
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |backoff| backoff.min(max))
}

/// Exponential per-key backoff: the first failure waits `base`, each further
/// consecutive failure doubles the wait, never exceeding `max`.
#[derive(Debug)]
pub struct ExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

impl<K> ExponentialBackoff<K> {
    /// Backoff starting at `base` and capped at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }
}

impl<K> Default for ExponentialBackoff<K> {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}

impl<K: Eq + Hash + Clone + Send> RateLimiter<K> for ExponentialBackoff<K> {
    fn when(&mut self, key: &K) -> Duration {
        let attempts = self.failures.entry(key.clone()).or_insert(0);
        let delay = calculate_backoff(*attempts, self.base, self.max);
        *attempts = attempts.saturating_add(1);
        delay
    }

    fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
