//! Deduplicating work queue with in-flight tracking and delayed retries.
//!
//! A key moves through three sets:
//!
//! - **dirty**: needs processing (queued, or re-queued while in flight)
//! - **queue**: dirty and not in flight, in FIFO order
//! - **processing**: handed to a worker by `get` and not yet `done`
//!
//! A key is never in `queue` and `processing` at once, which is what keeps
//! two workers off the same key. Delayed keys sit in `waiting` until their
//! deadline, then go through the normal `add` path.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, sleep_until};

use crate::rate_limiter::{ExponentialBackoff, RateLimiter};

/// Longest delay a key can be scheduled for (about 30 years). Longer delays
/// are clamped so the deadline always fits in an `Instant`.
pub const MAX_DELAY: Duration = Duration::from_secs(946_080_000);

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    waiting: HashMap<K, Instant>,
    rate_limiter: Box<dyn RateLimiter<K>>,
    shutting_down: bool,
}

impl<K: Eq + Hash + Clone> QueueState<K> {
    /// Returns true when the key became ready for `get`.
    fn insert(&mut self, key: K) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn schedule(&mut self, key: K, deadline: Instant) {
        self.waiting
            .entry(key)
            .and_modify(|current| *current = (*current).min(deadline))
            .or_insert(deadline);
    }

    fn promote_ready(&mut self, now: Instant) {
        let ready: Vec<K> = self
            .waiting
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in ready {
            self.waiting.remove(&key);
            self.insert(key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.values().min().copied()
    }
}

/// A work queue shared by event sources (producers) and workers (consumers).
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Create a queue with the default exponential backoff.
    pub fn new() -> Self {
        Self::with_rate_limiter(Box::new(ExponentialBackoff::default()))
    }

    /// Create a queue with a custom rate limiter.
    pub fn with_rate_limiter(rate_limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: HashMap::new(),
                rate_limiter,
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Mark a key as needing processing.
    ///
    /// Adding a key that is already queued is a no-op. Adding a key that is in
    /// flight marks it dirty so `done` hands it out again.
    pub async fn add(&self, key: K) {
        let ready = {
            let mut state = self.state.lock().await;
            state.waiting.remove(&key);
            state.insert(key)
        };
        if ready {
            self.notify.notify_one();
        }
    }

    /// Wait for the next eligible key.
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_deadline = {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                state.promote_ready(Instant::now());
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                state.next_deadline()
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Finish processing a key handed out by `get`.
    pub async fn done(&self, key: &K) {
        let ready = {
            let mut state = self.state.lock().await;
            state.processing.remove(key);
            if !state.shutting_down && state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if ready {
            self.notify.notify_one();
        }
    }

    /// Make a key eligible after `delay`. If the key is already waiting, the
    /// earlier deadline wins. Delays beyond `MAX_DELAY` are clamped to it.
    pub async fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.schedule(key, deadline_after(delay));
        }
        // Sleeping workers must recompute their wake-up time.
        self.notify.notify_waiters();
    }

    /// Requeue a key after the rate limiter's delay for it.
    ///
    /// Returns the delay that was applied.
    pub async fn add_rate_limited(&self, key: K) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return Duration::ZERO;
            }
            let delay = state.rate_limiter.when(&key);
            state.schedule(key, deadline_after(delay));
            delay
        };
        self.notify.notify_waiters();
        delay
    }

    /// Reset the backoff history for a key.
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.rate_limiter.forget(key);
    }

    /// Consecutive rate-limited requeues since the last `forget`.
    pub async fn num_requeues(&self, key: &K) -> u32 {
        self.state.lock().await.rate_limiter.num_requeues(key)
    }

    /// Number of keys ready for `get`.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// True when no key is ready for `get`.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop handing out work. Keys that have not started are discarded and
    /// every blocked `get` returns `None`.
    pub async fn shut_down(&self) {
        {
            let mut state = self.state.lock().await;
            state.shutting_down = true;
            state.queue.clear();
            state.dirty.clear();
            state.waiting.clear();
        }
        self.notify.notify_waiters();
    }

    /// True once `shut_down` has been called.
    pub async fn is_shutting_down(&self) -> bool {
        self.state.lock().await.shutting_down
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
