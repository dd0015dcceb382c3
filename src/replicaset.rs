//! The demo convergence policy: every ReplicaSet carries `hello=world`.

use std::sync::Arc;

use async_trait::async_trait;
use converge_core::GroupVersionKind;
use converge_reconciler::{Action, ReconcileRequest, ReconcileResult, Reconciler};
use converge_store::ObjectStore;
use tracing::{debug, info, warn};

/// Label key the reconciler enforces.
pub const LABEL_KEY: &str = "hello";

/// Label value the reconciler enforces.
pub const LABEL_VALUE: &str = "world";

/// `apps/v1` ReplicaSet.
pub fn replica_set_kind() -> GroupVersionKind {
    GroupVersionKind::gvk("apps", "v1", "ReplicaSet")
}

/// Core `v1` Pod.
pub fn pod_kind() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "Pod")
}

/// Ensures a label is present on every ReplicaSet.
pub struct EnsureLabel {
    store: Arc<dyn ObjectStore>,
    kind: GroupVersionKind,
    key: String,
    value: String,
}

impl EnsureLabel {
    /// Enforce `hello=world` on ReplicaSets.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            kind: replica_set_kind(),
            key: LABEL_KEY.to_string(),
            value: LABEL_VALUE.to_string(),
        }
    }

    /// Converge toward `key=value` instead of `hello=world`.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key = key.into();
        self.value = value.into();
        self
    }
}

#[async_trait]
impl Reconciler for EnsureLabel {
    async fn reconcile(&self, request: &ReconcileRequest) -> ReconcileResult {
        let replica_set = match self.store.get(&self.kind, &request.key).await {
            Ok(replica_set) => replica_set,
            Err(err) if err.is_not_found() => {
                info!(request = %request, "Could not find ReplicaSet, assuming deleted");
                return Ok(Action::done());
            }
            Err(err) => {
                warn!(request = %request, error = %err, "Could not fetch ReplicaSet");
                return Err(err.into());
            }
        };

        info!(
            name = %replica_set.name(),
            namespace = %replica_set.namespace(),
            spec = ?replica_set.spec(),
            "Reconciling ReplicaSet"
        );

        if replica_set.label(&self.key) == Some(self.value.as_str()) {
            debug!(label = %self.key, "Label already set");
            return Ok(Action::done());
        }

        // The fetched resourceVersion travels with the write, so a concurrent
        // change surfaces as a conflict.
        let updated = self
            .store
            .update(replica_set.with_label(&self.key, &self.value))
            .await?;
        info!(
            label = %self.key,
            resource_version = ?updated.resource_version(),
            "Label applied"
        );
        Ok(Action::done())
    }
}
