//! Event sources: watch one kind and feed mapped requests into a queue.

use std::sync::Arc;
use std::time::Duration;

use converge_core::GroupVersionKind;
use converge_store::{ChangeEvent, ObjectStore, WatchStream};
use futures::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::handler::EventHandler;
use crate::predicate::Predicate;
use crate::queue::WorkQueue;
use crate::rate_limiter::calculate_backoff;
use crate::shutdown::ShutdownListener;
use crate::types::ReconcileRequest;

/// Watches every object of one kind.
///
/// Reconnects on its own when the watch breaks; a reconnect replays existing
/// objects, so downstream code sees already-seen objects again.
#[derive(Clone)]
pub struct Kind {
    store: Arc<dyn ObjectStore>,
    gvk: GroupVersionKind,
    config: SourceConfig,
}

impl Kind {
    /// Watch `gvk` in `store` with the default reconnect settings.
    pub fn new(store: Arc<dyn ObjectStore>, gvk: GroupVersionKind) -> Self {
        Self {
            store,
            gvk,
            config: SourceConfig::default(),
        }
    }

    /// Replace the reconnect settings.
    #[must_use]
    pub fn with_config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }

    /// The watched kind.
    pub const fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    /// Establish the watch and spawn the task that drains it.
    ///
    /// # Errors
    ///
    /// Returns `WatchFailed` if the initial watch cannot be opened. That is
    /// fatal: the source does not retry it.
    pub async fn start(
        &self,
        handler: Arc<dyn EventHandler>,
        predicates: Arc<[Box<dyn Predicate>]>,
        queue: Arc<WorkQueue<ReconcileRequest>>,
        shutdown: ShutdownListener,
    ) -> Result<JoinHandle<()>> {
        let stream = self
            .store
            .watch(&self.gvk)
            .await
            .map_err(|e| Error::watch_failed(self.gvk.to_string(), e))?;

        info!(kind = %self.gvk, "Watch established");

        let watch = WatchLoop {
            source: self.clone(),
            handler,
            predicates,
            queue,
        };
        Ok(tokio::spawn(watch.run(stream, shutdown)))
    }
}

struct WatchLoop {
    source: Kind,
    handler: Arc<dyn EventHandler>,
    predicates: Arc<[Box<dyn Predicate>]>,
    queue: Arc<WorkQueue<ReconcileRequest>>,
}

impl WatchLoop {
    async fn run(self, mut stream: WatchStream, mut shutdown: ShutdownListener) {
        let gvk = &self.source.gvk;
        loop {
            tokio::select! {
                () = shutdown.wait() => {
                    debug!(kind = %gvk, "Watch stopped on shutdown");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => self.dispatch(&event).await,
                    Some(Err(err)) => {
                        warn!(kind = %gvk, error = %err, "Watch broke, reconnecting");
                        match self.reconnect(&mut shutdown).await {
                            Some(fresh) => stream = fresh,
                            None => return,
                        }
                    }
                    None => {
                        debug!(kind = %gvk, "Watch closed, reconnecting");
                        match self.reconnect(&mut shutdown).await {
                            Some(fresh) => stream = fresh,
                            None => return,
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: &ChangeEvent) {
        if !self.predicates.iter().all(|p| p.accept(event)) {
            debug!(
                kind = %self.source.gvk,
                key = %event.key(),
                event_type = %event.event_type(),
                "Event filtered"
            );
            return;
        }

        for request in self.handler.map(event) {
            debug!(
                kind = %self.source.gvk,
                event_type = %event.event_type(),
                request = %request,
                "Enqueueing request"
            );
            self.queue.add(request).await;
        }
    }

    /// Reopen the watch with capped, jittered backoff. Returns `None` if
    /// shutdown starts first.
    async fn reconnect(&self, shutdown: &mut ShutdownListener) -> Option<WatchStream> {
        let config = &self.source.config;
        let mut attempt = 0u32;
        loop {
            let delay = with_jitter(calculate_backoff(
                attempt,
                config.reconnect_base,
                config.reconnect_max,
            ));
            attempt = attempt.saturating_add(1);

            tokio::select! {
                () = shutdown.wait() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            match self.source.store.watch(&self.source.gvk).await {
                Ok(stream) => {
                    info!(kind = %self.source.gvk, attempt, "Watch re-established");
                    return Some(stream);
                }
                Err(err) => {
                    warn!(
                        kind = %self.source.gvk,
                        attempt,
                        error = %err,
                        "Failed to re-establish watch"
                    );
                }
            }
        }
    }
}

/// Add up to 25% random jitter so sources do not reconnect in lockstep.
fn with_jitter(delay: Duration) -> Duration {
    let quarter = delay.as_millis().checked_div(4).unwrap_or_default();
    let cap = u64::try_from(quarter).unwrap_or(u64::MAX);
    let jitter = rand::thread_rng().gen_range(0..=cap);
    delay.saturating_add(Duration::from_millis(jitter))
}
