//! Error types for the converge binary's library half.

use thiserror::Error;

/// Result type alias for application setup.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from loading config, seeding the store, or running the manager.
#[derive(Debug, Error)]
pub enum Error {
    /// A config or manifest file could not be loaded.
    #[error(transparent)]
    Load(#[from] converge_core::Error),

    /// Seeding the store failed.
    #[error("failed to seed {object}: {source}")]
    Seed {
        object: String,
        #[source]
        source: converge_store::Error,
    },

    /// The engine rejected the wiring or failed at runtime.
    #[error(transparent)]
    Reconciler(#[from] converge_reconciler::Error),
}

impl Error {
    /// Create a seed error.
    pub fn seed(object: impl Into<String>, source: converge_store::Error) -> Self {
        Self::Seed {
            object: object.into(),
            source,
        }
    }
}
