//! Event filters applied before mapping.
//!
//! Creates and deletes always pass; predicates only judge updates.

use converge_store::{ChangeEvent, EventType};

/// Decides whether a change event should reach the event handler.
pub trait Predicate: Send + Sync {
    /// False drops the event before it is mapped.
    fn accept(&self, event: &ChangeEvent) -> bool;
}

/// Compare the previous and current object of an update. Events with no
/// previous object are accepted.
fn judge_update(event: &ChangeEvent, changed: impl Fn(&ChangeEvent) -> bool) -> bool {
    match (event.event_type(), event.previous()) {
        (EventType::Update, Some(_)) => changed(event),
        _ => true,
    }
}

/// Drops updates whose resource version did not move (resyncs, replays).
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceVersionChanged;

impl Predicate for ResourceVersionChanged {
    fn accept(&self, event: &ChangeEvent) -> bool {
        judge_update(event, |e| {
            e.previous().and_then(|p| p.resource_version()) != e.object().resource_version()
        })
    }
}

/// Drops updates that only touched metadata or status.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationChanged;

impl Predicate for GenerationChanged {
    fn accept(&self, event: &ChangeEvent) -> bool {
        judge_update(event, |e| {
            e.previous().and_then(|p| p.metadata.generation) != e.object().metadata.generation
        })
    }
}

/// Passes updates whose labels changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelsChanged;

impl Predicate for LabelsChanged {
    fn accept(&self, event: &ChangeEvent) -> bool {
        judge_update(event, |e| {
            e.previous().map(converge_core::DynamicObject::labels) != Some(e.object().labels())
        })
    }
}

/// A predicate from a closure.
pub struct FnPredicate<F> {
    f: F,
}

impl<F> FnPredicate<F>
where
    F: Fn(&ChangeEvent) -> bool + Send + Sync,
{
    /// Wrap a filter closure.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&ChangeEvent) -> bool + Send + Sync,
{
    fn accept(&self, event: &ChangeEvent) -> bool {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::{DynamicObject, GroupVersionKind};

    fn replica_set(resource_version: &str, generation: i64) -> DynamicObject {
        let mut object =
            DynamicObject::new(&GroupVersionKind::gvk("apps", "v1", "ReplicaSet"), "rs1")
                .within("default");
        object.metadata.resource_version = Some(resource_version.to_string());
        object.metadata.generation = Some(generation);
        object
    }

    #[test]
    fn test_creates_and_deletes_always_pass() {
        let created = ChangeEvent::created(replica_set("1", 1));
        let deleted = ChangeEvent::deleted(replica_set("1", 1));
        for event in [created, deleted] {
            assert!(ResourceVersionChanged.accept(&event));
            assert!(GenerationChanged.accept(&event));
            assert!(LabelsChanged.accept(&event));
        }
    }

    #[test]
    fn test_resource_version_changed() {
        let same = ChangeEvent::updated(Some(replica_set("3", 1)), replica_set("3", 1));
        let moved = ChangeEvent::updated(Some(replica_set("3", 1)), replica_set("4", 1));
        assert!(!ResourceVersionChanged.accept(&same));
        assert!(ResourceVersionChanged.accept(&moved));
    }

    #[test]
    fn test_generation_changed_ignores_metadata_only_updates() {
        let label_only = ChangeEvent::updated(
            Some(replica_set("3", 1)),
            replica_set("4", 1).with_label("hello", "world"),
        );
        let spec_change = ChangeEvent::updated(Some(replica_set("3", 1)), replica_set("4", 2));
        assert!(!GenerationChanged.accept(&label_only));
        assert!(GenerationChanged.accept(&spec_change));
    }

    #[test]
    fn test_labels_changed() {
        let label_only = ChangeEvent::updated(
            Some(replica_set("3", 1)),
            replica_set("4", 1).with_label("hello", "world"),
        );
        let spec_change = ChangeEvent::updated(Some(replica_set("3", 1)), replica_set("4", 2));
        assert!(LabelsChanged.accept(&label_only));
        assert!(!LabelsChanged.accept(&spec_change));
    }

    #[test]
    fn test_update_without_previous_passes() {
        let event = ChangeEvent::updated(None, replica_set("4", 1));
        assert!(ResourceVersionChanged.accept(&event));
        assert!(LabelsChanged.accept(&event));
    }

    #[test]
    fn test_fn_predicate() {
        let only_default = FnPredicate::new(|e: &ChangeEvent| e.object().namespace() == "default");
        assert!(only_default.accept(&ChangeEvent::created(replica_set("1", 1))));
    }
}
