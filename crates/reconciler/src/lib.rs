//! Event-driven reconciliation engine.
//!
//! Watches object kinds, maps change events to the objects that must be
//! reconciled, and drives a pluggable `Reconciler` until observed state
//! matches desired state.
//!
//! # Key Concepts
//!
//! ## Data flow
//!
//! 1. A **source** (`Kind`) watches one object kind in the store
//! 2. **Predicates** drop events that cannot matter
//! 3. An **event handler** maps each event to reconcile requests: the object
//!    itself, or its controlling owner
//! 4. The **work queue** deduplicates requests and keeps each key on at most
//!    one worker at a time
//! 5. **Workers** call the reconciler and requeue with backoff on failure
//!
//! Reconcilers are level-based: they see a key, never the event that
//! produced it. Their own writes come back as events and must reconcile to
//! a no-op.
//!
//! ## Retry
//!
//! - Success forgets the key's backoff history
//! - Errors requeue with exponential backoff (base 5ms, capped at 1000s)
//! - Conflicts requeue the same way but log at `warn`
//! - `ReconcileError::Permanent` is logged and not requeued
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use converge_core::GroupVersionKind;
//! use converge_reconciler::{
//!     Controller, EnqueueRequestForObject, Kind, Manager, ManagerConfig, ShutdownCoordinator,
//! };
//! use converge_store::InMemoryObjectStore;
//!
//! #[tokio::main]
//! async fn main() -> converge_reconciler::Result<()> {
//!     let mut manager = Manager::new(Arc::new(InMemoryObjectStore::new()), ManagerConfig::default())?;
//!     let replica_sets = Kind::new(manager.store(), GroupVersionKind::gvk("apps", "v1", "ReplicaSet"));
//!
//!     let controller = Controller::builder("foo-controller", Arc::new(MyReconciler))
//!         .watches(replica_sets, EnqueueRequestForObject)
//!         .build()?;
//!     manager.add(controller);
//!
//!     let shutdown = ShutdownCoordinator::new();
//!     manager.start(shutdown.subscribe()).await
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
pub mod manager;
pub mod predicate;
pub mod queue;
pub mod rate_limiter;
pub mod reconciler;
pub mod shutdown;
pub mod source;
pub mod types;

// Re-export main types
pub use config::{ControllerConfig, ManagerConfig, SourceConfig};
pub use controller::{Controller, ControllerBuilder, Dispatcher};
pub use error::{Error, Result};
pub use handler::{
    EnqueueRequestForObject, EnqueueRequestForOwner, EnqueueRequestsFromMapFn, EventHandler,
};
pub use manager::Manager;
pub use predicate::{
    FnPredicate, GenerationChanged, LabelsChanged, Predicate, ResourceVersionChanged,
};
pub use queue::WorkQueue;
pub use rate_limiter::{ExponentialBackoff, RateLimiter};
pub use reconciler::{FnReconciler, Reconciler};
pub use shutdown::{
    ShutdownCoordinator, ShutdownListener, ShutdownPhase, ShutdownSignal, install_signal_handlers,
};
pub use source::Kind;
pub use types::{Action, ReconcileError, ReconcileRequest, ReconcileResult};
