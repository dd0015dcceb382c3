#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # converge
//!
//! A ReplicaSet controller built on the converge reconciliation engine.
//!
//! The `foo-controller` watches ReplicaSets directly and Pods through their
//! controlling owner reference, and makes sure every ReplicaSet carries the
//! `hello=world` label.

use std::path::PathBuf;
use std::sync::Arc;

use converge_core::load_manifests;
use converge_reconciler::{
    Controller, EnqueueRequestForObject, EnqueueRequestForOwner, Kind, Manager, Predicate,
    ResourceVersionChanged,
};
use converge_store::ObjectStore;
use tracing::{debug, info};

pub mod cli;
pub mod config;
pub mod error;
pub mod replicaset;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use replicaset::EnsureLabel;

use replicaset::{pod_kind, replica_set_kind};

/// Name the ReplicaSet controller registers under.
pub const CONTROLLER_NAME: &str = "foo-controller";

/// Build the ReplicaSet controller.
///
/// ReplicaSet events enqueue the ReplicaSet itself; Pod events enqueue the
/// ReplicaSet that controls the Pod.
///
/// # Errors
///
/// Returns an error if the controller config is invalid.
pub fn replica_set_controller(store: Arc<dyn ObjectStore>, config: &AppConfig) -> Result<Controller> {
    let replica_sets =
        Kind::new(Arc::clone(&store), replica_set_kind()).with_config(config.source.clone());
    let pods = Kind::new(Arc::clone(&store), pod_kind()).with_config(config.source.clone());
    let skip_resyncs: Vec<Box<dyn Predicate>> = vec![Box::new(ResourceVersionChanged)];

    let controller = Controller::builder(CONTROLLER_NAME, Arc::new(EnsureLabel::new(store)))
        .with_config(config.controller.clone())
        .watches_with(replica_sets, EnqueueRequestForObject, skip_resyncs)
        .watches(
            pods,
            EnqueueRequestForOwner::controller(replica_set_kind().group_kind()),
        )
        .build()?;
    Ok(controller)
}

/// Create a manager with the ReplicaSet controller registered.
///
/// # Errors
///
/// Returns an error if the manager or controller config is invalid.
pub fn build_manager(store: Arc<dyn ObjectStore>, config: &AppConfig) -> Result<Manager> {
    let mut manager = Manager::new(store, config.manager.clone())?;
    let controller = replica_set_controller(manager.store(), config)?;
    manager.add(controller);
    Ok(manager)
}

/// Load manifest files into the store. Objects that already exist are left
/// untouched.
///
/// # Errors
///
/// Returns an error if a manifest cannot be loaded or an object cannot be
/// created.
pub async fn seed_store(store: &dyn ObjectStore, paths: &[PathBuf]) -> Result<usize> {
    let mut created: usize = 0;
    for path in paths {
        let objects = load_manifests(path)?;
        debug!(path = %path.display(), objects = objects.len(), "Loaded manifests");

        for object in objects {
            let description = format!("{} {}", object.kind, object.key());
            match store.create(object).await {
                Ok(_) => created = created.saturating_add(1),
                Err(converge_store::Error::AlreadyExists { .. }) => {
                    debug!(object = %description, "Already exists, skipping");
                }
                Err(err) => return Err(Error::seed(description, err)),
            }
        }
    }
    info!(created, "Seeded store");
    Ok(created)
}
