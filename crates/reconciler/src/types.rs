//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use converge_core::NamespacedName;
use thiserror::Error;

/// The unit of reconcile work: the identity of one object.
///
/// The kind is implied by the controller the request is queued on, so many
/// raw events for the same object collapse into one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReconcileRequest {
    /// Namespace and name of the object to reconcile.
    pub key: NamespacedName,
}

impl ReconcileRequest {
    /// Create a request for a namespaced object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: NamespacedName::new(namespace, name),
        }
    }

    /// Namespace of the object to reconcile.
    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    /// Name of the object to reconcile.
    pub fn name(&self) -> &str {
        &self.key.name
    }
}

impl From<NamespacedName> for ReconcileRequest {
    fn from(key: NamespacedName) -> Self {
        Self { key }
    }
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}

/// What the dispatcher should do with a key after a successful reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Action {
    /// Requeue through the rate limiter.
    pub requeue: bool,
    /// Requeue after a fixed delay. Takes precedence over `requeue`.
    pub requeue_after: Option<Duration>,
}

impl Action {
    /// Converged; nothing more to do until the next event.
    pub const fn done() -> Self {
        Self {
            requeue: false,
            requeue_after: None,
        }
    }

    /// Ask to be reconciled again after the rate limiter's delay.
    pub const fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    /// Ask to be reconciled again after `delay`.
    pub const fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(delay),
        }
    }
}

/// A failed reconcile.
///
/// The variant is the reconcile function's own classification; the dispatcher
/// uses it only to pick a retry path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// A concurrent write raced ours.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Worth retrying with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// Retrying without a new event cannot help.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// The reconcile call exceeded its deadline.
    #[error("reconcile timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A store call failed.
    #[error("store error: {0}")]
    Store(converge_store::Error),
}

impl ReconcileError {
    /// Create a conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }

    /// Create a transient error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Create a permanent error.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Create a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Check if this error is a write conflict.
    pub const fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Store(err) => err.is_conflict(),
            _ => false,
        }
    }

    /// Check if this error should not be retried.
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

impl From<converge_store::Error> for ReconcileError {
    fn from(err: converge_store::Error) -> Self {
        if err.is_conflict() {
            Self::Conflict(err.to_string())
        } else {
            Self::Store(err)
        }
    }
}

/// Outcome of one reconcile call.
pub type ReconcileResult = std::result::Result<Action, ReconcileError>;
