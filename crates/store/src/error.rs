//! Error types for the store crate.

use converge_core::NamespacedName;
use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The object does not exist.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: String, key: NamespacedName },

    /// Create of an object that already exists.
    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: NamespacedName },

    /// The write was based on a stale resource version.
    #[error(
        "conflict writing {kind} '{key}': the object has been modified \
         (expected resourceVersion {expected}, found {actual})"
    )]
    Conflict {
        kind: String,
        key: NamespacedName,
        expected: String,
        actual: String,
    },

    /// The object failed validation.
    #[error("invalid object: {0}")]
    Invalid(#[from] converge_core::Error),

    /// A store call exceeded its deadline.
    #[error("store operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The store could not be reached.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// A watch stream broke and must be re-established.
    #[error("watch on {kind} expired: {reason}")]
    WatchExpired { kind: String, reason: String },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, key: NamespacedName) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key,
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl Into<String>, key: NamespacedName) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key,
        }
    }

    /// Create a conflict error.
    pub fn conflict(
        kind: impl Into<String>,
        key: NamespacedName,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a watch expired error.
    pub fn watch_expired(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WatchExpired {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// True if the object does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True if a write lost an optimistic-concurrency race.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
