//! Error types for the reconciler crate.
//!
//! These are engine errors: problems wiring or running controllers. Failures
//! of an individual reconcile are `ReconcileError`s and never escape a worker.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// The initial watch for a source could not be established.
    #[error("failed to establish watch for {kind}: {source}")]
    WatchFailed {
        kind: String,
        #[source]
        source: converge_store::Error,
    },

    /// A controller was built without any watches.
    #[error("controller '{controller}' has no watches configured")]
    NoWatches { controller: String },

    /// A background task died unexpectedly.
    #[error("task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: String },

    /// Teardown did not finish in time.
    #[error("shutdown did not complete within {timeout_ms}ms")]
    ShutdownTimeout { timeout_ms: u64 },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a watch failed error.
    pub fn watch_failed(kind: impl Into<String>, source: converge_store::Error) -> Self {
        Self::WatchFailed {
            kind: kind.into(),
            source,
        }
    }

    /// Create a no watches error.
    pub fn no_watches(controller: impl Into<String>) -> Self {
        Self::NoWatches {
            controller: controller.into(),
        }
    }

    /// Create a task failed error.
    pub fn task_failed(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
