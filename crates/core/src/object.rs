//! Store object model.
//!
//! Objects are untyped: a `DynamicObject` carries `apiVersion`, `kind`,
//! `metadata`, and whatever other top-level fields the kind defines. The
//! engine only ever looks at metadata; reconcilers read the rest.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Identifies a kind of object: API group, version, and kind name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group; empty for the core group.
    pub group: String,
    /// API version within the group.
    pub version: String,
    /// Kind name, e.g. `ReplicaSet`.
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new group/version/kind.
    pub fn gvk(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Build from an `apiVersion` string (`group/version` or `version`) and a kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the apiVersion is malformed.
    pub fn from_api_version(api_version: &str, kind: &str) -> Result<Self> {
        let (group, version) = split_api_version(api_version)?;
        Ok(Self::gvk(group, version, kind))
    }

    /// The `apiVersion` string for this kind.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Drop the version.
    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.group.clone(), self.kind.clone())
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// A kind independent of version. Owner matching uses this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    /// Create a group/kind pair. An empty group is the core group.
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Split `group/version` into its parts. A bare `version` means the core group.
fn split_api_version(api_version: &str) -> Result<(String, String)> {
    match api_version.split_once('/') {
        Some((group, version)) => {
            if group.is_empty() || version.is_empty() || version.contains('/') {
                Err(Error::invalid_api_version(
                    api_version,
                    "expected 'group/version'",
                ))
            } else {
                Ok((group.to_string(), version.to_string()))
            }
        }
        None if api_version.is_empty() => {
            Err(Error::invalid_api_version(api_version, "empty apiVersion"))
        }
        None => Ok((String::new(), api_version.to_string())),
    }
}

/// Namespace and name of an object. An empty namespace means cluster-scoped.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    /// Create a namespaced key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Full identity of a store object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReference {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectReference {
    /// Combine a kind and a key into one identity.
    pub fn new(gvk: &GroupVersionKind, key: &NamespacedName) -> Self {
        Self {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            kind: gvk.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }

    /// The referenced kind.
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// The referenced namespace and name.
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.gvk(), self.key())
    }
}

/// Back-reference from a dependent object to an object that owns it.
///
/// Lookup only: the dependent never controls the owner's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Set on at most one owner: the managing controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// A non-controller owner reference.
    pub fn new(gvk: &GroupVersionKind, name: impl Into<String>) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            name: name.into(),
            uid: String::new(),
            controller: None,
            block_owner_deletion: None,
        }
    }

    /// An owner reference marking `name` as the managing controller.
    pub fn controller(gvk: &GroupVersionKind, name: impl Into<String>) -> Self {
        Self {
            controller: Some(true),
            block_owner_deletion: Some(true),
            ..Self::new(gvk, name)
        }
    }

    /// Set the owner's uid.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }

    /// True if this owner is the managing controller.
    pub fn is_controller(&self) -> bool {
        self.controller.unwrap_or(false)
    }

    /// Group and kind of the owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference carries a malformed apiVersion.
    pub fn group_kind(&self) -> Result<GroupKind> {
        let (group, _) = split_api_version(&self.api_version)?;
        Ok(GroupKind::new(group, self.kind.clone()))
    }
}

/// Standard object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Opaque version token; bumped by the store on every effective write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Bumped by the store when anything outside metadata changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Namespace and name as a key.
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.is_controller())
    }
}

/// An object of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObject {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Every other top-level field (`spec`, `status`, `data`, ...).
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl DynamicObject {
    /// An empty object of the given kind.
    pub fn new(gvk: &GroupVersionKind, name: impl Into<String>) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            metadata: ObjectMeta {
                name: name.into(),
                ..ObjectMeta::default()
            },
            data: Map::new(),
        }
    }

    /// Place the object in `namespace`.
    #[must_use]
    pub fn within(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = namespace.into();
        self
    }

    /// Set a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Append an owner reference.
    #[must_use]
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.metadata.owner_references.push(owner);
        self
    }

    /// Set a top-level field such as `spec`.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.data.insert(field.into(), value);
        self
    }

    /// Parsed group/version/kind.
    ///
    /// # Errors
    ///
    /// Returns an error if `apiVersion` is malformed.
    pub fn gvk(&self) -> Result<GroupVersionKind> {
        GroupVersionKind::from_api_version(&self.api_version, &self.kind)
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Object namespace; empty when cluster-scoped.
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Namespace and name as a key.
    pub fn key(&self) -> NamespacedName {
        self.metadata.key()
    }

    /// All labels.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    /// Mutable access to the labels.
    pub fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.metadata.labels
    }

    /// Value of one label, if set.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    /// Owner references, in declaration order.
    pub fn owner_references(&self) -> &[OwnerReference] {
        &self.metadata.owner_references
    }

    /// Version token of the stored copy this object was read from.
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// The `spec` field, if present.
    pub fn spec(&self) -> Option<&Value> {
        self.data.get("spec")
    }

    /// Full identity of this object.
    ///
    /// # Errors
    ///
    /// Returns an error if `apiVersion` is malformed.
    pub fn object_ref(&self) -> Result<ObjectReference> {
        Ok(ObjectReference::new(&self.gvk()?, &self.key()))
    }

    /// An owner reference pointing at this object, flagged as controller.
    ///
    /// # Errors
    ///
    /// Returns an error if `apiVersion` is malformed.
    pub fn controller_reference(&self) -> Result<OwnerReference> {
        let owner = OwnerReference::controller(&self.gvk()?, self.name());
        Ok(match &self.metadata.uid {
            Some(uid) => owner.with_uid(uid.clone()),
            None => owner,
        })
    }

    /// Check the fields every store requires.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or malformed field.
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_empty() {
            return Err(Error::missing_field("kind"));
        }
        if self.metadata.name.is_empty() {
            return Err(Error::missing_field("metadata.name"));
        }
        split_api_version(&self.api_version).map(|_| ())
    }
}
