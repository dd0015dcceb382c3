//! Event handlers: map a change event to the requests it implies.
//!
//! Decoupling "what changed" from "what must be reconciled" lets a controller
//! react to objects it does not reconcile directly, as long as an owner
//! reference links them.

use converge_core::{DynamicObject, GroupKind};
use converge_store::ChangeEvent;
use itertools::Itertools;
use tracing::warn;

use crate::types::ReconcileRequest;

/// Maps a change event to zero or more reconcile requests.
pub trait EventHandler: Send + Sync {
    /// Requests to enqueue for `event`. Empty when nothing should be reconciled.
    fn map(&self, event: &ChangeEvent) -> Vec<ReconcileRequest>;
}

/// Enqueues the object that changed. For kinds a controller reconciles
/// directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueRequestForObject;

impl EventHandler for EnqueueRequestForObject {
    fn map(&self, event: &ChangeEvent) -> Vec<ReconcileRequest> {
        vec![ReconcileRequest::from(event.key())]
    }
}

/// Enqueues the owner of the object that changed. For dependent kinds.
#[derive(Debug, Clone)]
pub struct EnqueueRequestForOwner {
    owner: GroupKind,
    controller_only: bool,
}

impl EnqueueRequestForOwner {
    /// Follow only the owner reference flagged as controller.
    pub const fn controller(owner: GroupKind) -> Self {
        Self {
            owner,
            controller_only: true,
        }
    }

    /// Follow every owner reference of the tracked kind.
    pub const fn any_owner(owner: GroupKind) -> Self {
        Self {
            owner,
            controller_only: false,
        }
    }

    fn owners_of<'a>(
        &'a self,
        object: &'a DynamicObject,
    ) -> impl Iterator<Item = ReconcileRequest> + 'a {
        object
            .owner_references()
            .iter()
            .filter(move |owner_ref| !self.controller_only || owner_ref.is_controller())
            .filter(move |owner_ref| match owner_ref.group_kind() {
                Ok(group_kind) => group_kind == self.owner,
                Err(err) => {
                    warn!(
                        object = %object.key(),
                        owner = %owner_ref.name,
                        error = %err,
                        "Skipping malformed owner reference"
                    );
                    false
                }
            })
            // Owners live in the dependent's namespace.
            .map(move |owner_ref| ReconcileRequest::new(object.namespace(), owner_ref.name.clone()))
    }
}

impl EventHandler for EnqueueRequestForOwner {
    fn map(&self, event: &ChangeEvent) -> Vec<ReconcileRequest> {
        // A changed owner reference must re-trigger the old owner too.
        event
            .previous()
            .into_iter()
            .chain(std::iter::once(event.object()))
            .flat_map(|object| self.owners_of(object))
            .unique()
            .collect_vec()
    }
}

/// Enqueues whatever a closure returns.
pub struct EnqueueRequestsFromMapFn<F> {
    f: F,
}

impl<F> EnqueueRequestsFromMapFn<F>
where
    F: Fn(&DynamicObject) -> Vec<ReconcileRequest> + Send + Sync,
{
    /// Wrap a mapping closure.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventHandler for EnqueueRequestsFromMapFn<F>
where
    F: Fn(&DynamicObject) -> Vec<ReconcileRequest> + Send + Sync,
{
    fn map(&self, event: &ChangeEvent) -> Vec<ReconcileRequest> {
        event
            .previous()
            .into_iter()
            .chain(std::iter::once(event.object()))
            .flat_map(|object| (self.f)(object))
            .unique()
            .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{GroupVersionKind, OwnerReference};

    fn replica_set() -> GroupVersionKind {
        GroupVersionKind::gvk("apps", "v1", "ReplicaSet")
    }

    fn pod(name: &str) -> DynamicObject {
        DynamicObject::new(&GroupVersionKind::gvk("", "v1", "Pod"), name).within("default")
    }

    fn for_replica_sets() -> EnqueueRequestForOwner {
        EnqueueRequestForOwner::controller(replica_set().group_kind())
    }

    #[test]
    fn test_identity_maps_to_object() {
        let event = ChangeEvent::created(pod("p1"));
        assert_eq!(
            EnqueueRequestForObject.map(&event),
            vec![ReconcileRequest::new("default", "p1")]
        );
    }

    #[test]
    fn test_owner_maps_to_controller() {
        let event = ChangeEvent::created(
            pod("p1").with_owner(OwnerReference::controller(&replica_set(), "rs1")),
        );
        assert_eq!(
            for_replica_sets().map(&event),
            vec![ReconcileRequest::new("default", "rs1")]
        );
    }

    #[test]
    fn test_owner_without_controller_ref_maps_to_nothing() {
        let event = ChangeEvent::created(
            pod("p1").with_owner(OwnerReference::new(&replica_set(), "rs1")),
        );
        assert!(for_replica_sets().map(&event).is_empty());
        assert!(for_replica_sets().map(&ChangeEvent::created(pod("p2"))).is_empty());
    }

    #[test]
    fn test_any_owner_follows_non_controller_refs() {
        let event = ChangeEvent::created(
            pod("p1").with_owner(OwnerReference::new(&replica_set(), "rs1")),
        );
        let handler = EnqueueRequestForOwner::any_owner(replica_set().group_kind());
        assert_eq!(handler.map(&event), vec![ReconcileRequest::new("default", "rs1")]);
    }

    #[test]
    fn test_owner_ignores_other_kinds_and_versions() {
        let deployment = GroupVersionKind::gvk("apps", "v1", "Deployment");
        let old_replica_set = GroupVersionKind::gvk("apps", "v1beta2", "ReplicaSet");
        let event = ChangeEvent::created(
            pod("p1")
                .with_owner(OwnerReference::controller(&deployment, "d1"))
                .with_owner(OwnerReference::controller(&old_replica_set, "rs1")),
        );
        // Version differs but group and kind match.
        assert_eq!(
            for_replica_sets().map(&event),
            vec![ReconcileRequest::new("default", "rs1")]
        );
    }

    #[test]
    fn test_owner_update_maps_old_and_new_owner() {
        let before = pod("p1").with_owner(OwnerReference::controller(&replica_set(), "rs1"));
        let after = pod("p1").with_owner(OwnerReference::controller(&replica_set(), "rs2"));
        let event = ChangeEvent::updated(Some(before), after);

        assert_eq!(
            for_replica_sets().map(&event),
            vec![
                ReconcileRequest::new("default", "rs1"),
                ReconcileRequest::new("default", "rs2"),
            ]
        );
    }

    #[test]
    fn test_owner_update_same_owner_deduplicates() {
        let before = pod("p1").with_owner(OwnerReference::controller(&replica_set(), "rs1"));
        let after = before.clone().with_label("phase", "running");
        let event = ChangeEvent::updated(Some(before), after);

        assert_eq!(for_replica_sets().map(&event).len(), 1);
    }

    #[test]
    fn test_malformed_owner_api_version_is_skipped() {
        let mut broken = OwnerReference::controller(&replica_set(), "rs1");
        broken.api_version = "apps/v1/extra".to_string();
        let event = ChangeEvent::created(pod("p1").with_owner(broken));

        assert!(for_replica_sets().map(&event).is_empty());
    }

    #[test]
    fn test_map_fn_handler() {
        let handler = EnqueueRequestsFromMapFn::new(|object: &DynamicObject| {
            object
                .label("app")
                .map(|app| vec![ReconcileRequest::new(object.namespace(), app)])
                .unwrap_or_default()
        });
        let event = ChangeEvent::created(pod("p1").with_label("app", "web"));

        assert_eq!(handler.map(&event), vec![ReconcileRequest::new("default", "web")]);
    }
}
