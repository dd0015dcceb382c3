//! Change notifications emitted by store watches.

use std::fmt;

use converge_core::{DynamicObject, NamespacedName};
use serde::{Deserialize, Serialize};

/// What happened to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A single change to a watched object.
///
/// The object is a trigger, never a data source: reconcilers re-read the
/// store rather than trusting the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    event_type: EventType,
    object: DynamicObject,
    /// The object as it was before an update, when the source knows it.
    previous: Option<DynamicObject>,
}

impl ChangeEvent {
    /// Object was created (or replayed on watch start).
    pub const fn created(object: DynamicObject) -> Self {
        Self {
            event_type: EventType::Create,
            object,
            previous: None,
        }
    }

    /// Object was updated.
    pub const fn updated(previous: Option<DynamicObject>, object: DynamicObject) -> Self {
        Self {
            event_type: EventType::Update,
            object,
            previous,
        }
    }

    /// Object was deleted; carries its final state.
    pub const fn deleted(object: DynamicObject) -> Self {
        Self {
            event_type: EventType::Delete,
            object,
            previous: None,
        }
    }

    /// Whether this is a create, update or delete.
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// The object after the change, or the removed object for a delete.
    pub const fn object(&self) -> &DynamicObject {
        &self.object
    }

    /// The object before an update, when known.
    pub const fn previous(&self) -> Option<&DynamicObject> {
        self.previous.as_ref()
    }

    /// Namespace and name of the changed object.
    pub fn key(&self) -> NamespacedName {
        self.object.key()
    }
}
