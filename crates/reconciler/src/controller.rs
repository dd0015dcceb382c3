//! Controllers: sources, a work queue, and the workers that drain it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::handler::EventHandler;
use crate::predicate::Predicate;
use crate::queue::WorkQueue;
use crate::rate_limiter::ExponentialBackoff;
use crate::reconciler::Reconciler;
use crate::shutdown::ShutdownListener;
use crate::source::Kind;
use crate::types::{Action, ReconcileError, ReconcileRequest, ReconcileResult};

/// Pulls keys from a queue, reconciles them, and feeds the outcome back.
///
/// The dispatcher never interprets success or failure beyond choosing a retry
/// path; convergence policy belongs to the reconciler.
pub struct Dispatcher {
    controller: String,
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue<ReconcileRequest>>,
    reconcile_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher that bounds each reconcile by `reconcile_timeout`.
    pub fn new(
        controller: impl Into<String>,
        reconciler: Arc<dyn Reconciler>,
        queue: Arc<WorkQueue<ReconcileRequest>>,
        reconcile_timeout: Duration,
    ) -> Self {
        Self {
            controller: controller.into(),
            reconciler,
            queue,
            reconcile_timeout,
        }
    }

    /// Process one key. Returns false once the queue has shut down.
    ///
    /// A reconciler that panics is treated like one that returned a
    /// transient error: the key is requeued with backoff and always released
    /// with `done`.
    pub async fn process_next(&self) -> bool {
        let Some(request) = self.queue.get().await else {
            return false;
        };

        let span = info_span!("reconcile", controller = %self.controller, key = %request);
        async {
            let attempt = AssertUnwindSafe(self.reconciler.reconcile(&request)).catch_unwind();
            let result = match timeout(self.reconcile_timeout, attempt).await {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(ReconcileError::transient(format!(
                    "reconciler panicked: {}",
                    panic_message(payload.as_ref())
                ))),
                Err(_) => Err(ReconcileError::timeout(self.reconcile_timeout)),
            };
            self.handle_result(&request, result).await;
            self.queue.done(&request).await;
        }
        .instrument(span)
        .await;

        true
    }

    async fn handle_result(&self, request: &ReconcileRequest, result: ReconcileResult) {
        match result {
            Ok(Action {
                requeue_after: Some(delay),
                ..
            }) => {
                self.queue.forget(request).await;
                self.queue.add_after(request.clone(), delay).await;
                debug!(
                    requeue_after_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reconciled, requeue scheduled"
                );
            }
            Ok(Action { requeue: true, .. }) => {
                let delay = self.queue.add_rate_limited(request.clone()).await;
                debug!(delay = ?delay, "Reconciled, requeue requested");
            }
            Ok(_) => {
                self.queue.forget(request).await;
                debug!("Reconciled");
            }
            Err(err) if err.is_permanent() => {
                // Not retried; the next change event for this key brings it back.
                self.queue.forget(request).await;
                error!(error = %err, "Reconcile failed permanently, not requeueing");
            }
            Err(err) if err.is_conflict() => {
                let delay = self.queue.add_rate_limited(request.clone()).await;
                warn!(error = %err, delay = ?delay, "Reconcile conflicted, requeueing");
            }
            Err(err) => {
                let delay = self.queue.add_rate_limited(request.clone()).await;
                error!(error = %err, delay = ?delay, "Reconcile failed, requeueing");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn worker_failure(controller: &str, joined: std::result::Result<(), JoinError>) -> Option<Error> {
    joined.err().map(|err| {
        error!(controller = %controller, error = %err, "Worker ended abnormally");
        Error::task_failed(format!("{controller} worker"), err.to_string())
    })
}

struct Watch {
    source: Kind,
    handler: Arc<dyn EventHandler>,
    predicates: Arc<[Box<dyn Predicate>]>,
}

/// Builder for a `Controller`.
pub struct ControllerBuilder {
    name: String,
    reconciler: Arc<dyn Reconciler>,
    watches: Vec<Watch>,
    config: ControllerConfig,
}

impl ControllerBuilder {
    /// Start building a controller named `name` around `reconciler`.
    pub fn new(name: impl Into<String>, reconciler: Arc<dyn Reconciler>) -> Self {
        Self {
            name: name.into(),
            reconciler,
            watches: Vec::new(),
            config: ControllerConfig::default(),
        }
    }

    /// Feed events from `source` through `handler` into this controller.
    #[must_use]
    pub fn watches(self, source: Kind, handler: impl EventHandler + 'static) -> Self {
        self.watches_with(source, handler, Vec::new())
    }

    /// Like `watches`, dropping events any predicate rejects.
    #[must_use]
    pub fn watches_with(
        mut self,
        source: Kind,
        handler: impl EventHandler + 'static,
        predicates: Vec<Box<dyn Predicate>>,
    ) -> Self {
        self.watches.push(Watch {
            source,
            handler: Arc::new(handler),
            predicates: Arc::from(predicates),
        });
        self
    }

    /// Replace the controller config.
    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of keys reconciled in parallel.
    #[must_use]
    pub const fn max_concurrent_reconciles(mut self, workers: usize) -> Self {
        self.config.max_concurrent_reconciles = workers;
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or nothing is watched.
    pub fn build(self) -> Result<Controller> {
        self.config.validate()?;
        if self.watches.is_empty() {
            return Err(Error::no_watches(self.name));
        }

        let queue = Arc::new(WorkQueue::with_rate_limiter(Box::new(
            ExponentialBackoff::new(self.config.backoff_base, self.config.backoff_max),
        )));
        let dispatcher = Arc::new(Dispatcher::new(
            self.name.clone(),
            self.reconciler,
            Arc::clone(&queue),
            self.config.reconcile_timeout,
        ));

        Ok(Controller {
            name: self.name,
            watches: self.watches,
            queue,
            dispatcher,
            workers: self.config.max_concurrent_reconciles,
        })
    }
}

/// Reconciles one kind of object.
pub struct Controller {
    name: String,
    watches: Vec<Watch>,
    queue: Arc<WorkQueue<ReconcileRequest>>,
    dispatcher: Arc<Dispatcher>,
    workers: usize,
}

impl Controller {
    /// Start building a controller named `name` around `reconciler`.
    pub fn builder(name: impl Into<String>, reconciler: Arc<dyn Reconciler>) -> ControllerBuilder {
        ControllerBuilder::new(name, reconciler)
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The controller's work queue.
    pub const fn queue(&self) -> &Arc<WorkQueue<ReconcileRequest>> {
        &self.queue
    }

    /// Run until `shutdown` fires or a worker dies.
    ///
    /// Sources stop, the queue shuts down (discarding work that has not
    /// started), and in-flight reconciles finish before this returns.
    ///
    /// # Errors
    ///
    /// Returns `WatchFailed` if a source cannot establish its initial watch,
    /// or `TaskFailed` if a worker exits abnormally.
    pub async fn start(self, mut shutdown: ShutdownListener) -> Result<()> {
        let mut sources: Vec<JoinHandle<()>> = Vec::with_capacity(self.watches.len());
        for watch in &self.watches {
            let started = watch
                .source
                .start(
                    Arc::clone(&watch.handler),
                    Arc::clone(&watch.predicates),
                    Arc::clone(&self.queue),
                    shutdown.clone(),
                )
                .await;
            match started {
                Ok(handle) => sources.push(handle),
                Err(err) => {
                    error!(controller = %self.name, error = %err, "Failed to start source");
                    sources.iter().for_each(JoinHandle::abort);
                    return Err(err);
                }
            }
        }

        info!(
            controller = %self.name,
            workers = self.workers,
            sources = sources.len(),
            "Starting workers"
        );
        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let dispatcher = Arc::clone(&self.dispatcher);
            workers.spawn(async move { while dispatcher.process_next().await {} });
        }

        // Workers only return once the queue shuts down, so one finishing
        // early means it died and the controller can no longer make progress.
        let mut failure = tokio::select! {
            () = shutdown.wait() => None,
            Some(joined) = workers.join_next() => {
                let exited_early = || Error::task_failed(format!("{} worker", self.name), "exited early");
                Some(worker_failure(&self.name, joined).unwrap_or_else(exited_early))
            }
        };
        info!(controller = %self.name, "Stopping controller");

        self.queue.shut_down().await;
        if failure.is_some() {
            sources.iter().for_each(JoinHandle::abort);
        } else {
            for source in sources {
                if let Err(err) = source.await {
                    warn!(controller = %self.name, error = %err, "Source task ended abnormally");
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Some(err) = worker_failure(&self.name, joined) {
                failure.get_or_insert(err);
            }
        }

        info!(controller = %self.name, "Controller stopped");
        failure.map_or(Ok(()), Err)
    }
}
