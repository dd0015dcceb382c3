//! Object store trait and decorators.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use converge_core::{DynamicObject, GroupVersionKind, NamespacedName, ObjectReference};
use futures::stream::BoxStream;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::event::ChangeEvent;

/// Stream of change notifications for one kind.
///
/// An `Err` item means the watch broke; the consumer should drop the stream
/// and call `watch` again.
pub type WatchStream = BoxStream<'static, Result<ChangeEvent>>;

/// A versioned store of typed objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object.
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject>;

    /// List objects of a kind, optionally restricted to one namespace.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create an object; fails if it already exists.
    async fn create(&self, object: DynamicObject) -> Result<DynamicObject>;

    /// Replace an object. When `metadata.resourceVersion` is set it must match
    /// the stored version or the write is rejected with `Conflict`.
    async fn update(&self, object: DynamicObject) -> Result<DynamicObject>;

    /// Delete an object, returning its final state.
    async fn delete(&self, gvk: &GroupVersionKind, key: &NamespacedName)
    -> Result<DynamicObject>;

    /// Watch a kind. The stream begins with a `Create` for every existing
    /// object, then follows live changes.
    async fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject> {
        (**self).get(gvk, key).await
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        (**self).list(gvk, namespace).await
    }

    async fn create(&self, object: DynamicObject) -> Result<DynamicObject> {
        (**self).create(object).await
    }

    async fn update(&self, object: DynamicObject) -> Result<DynamicObject> {
        (**self).update(object).await
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        key: &NamespacedName,
    ) -> Result<DynamicObject> {
        (**self).delete(gvk, key).await
    }

    async fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream> {
        (**self).watch(gvk).await
    }
}

/// Identity of an object for log fields, falling back to the raw kind when
/// its apiVersion does not parse.
fn describe(object: &DynamicObject) -> String {
    object.object_ref().map_or_else(
        |_| format!("{} {}", object.kind, object.key()),
        |reference| reference.to_string(),
    )
}

/// A wrapper that adds tracing to an object store.
pub struct TracingObjectStore<S: ObjectStore> {
    inner: S,
}

impl<S: ObjectStore> TracingObjectStore<S> {
    /// Create a new tracing object store.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for TracingObjectStore<S> {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject> {
        tracing::trace!(object = %ObjectReference::new(gvk, key), "Getting object");
        self.inner.get(gvk, key).await
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        tracing::trace!(kind = %gvk, namespace = ?namespace, "Listing objects");
        self.inner.list(gvk, namespace).await
    }

    async fn create(&self, object: DynamicObject) -> Result<DynamicObject> {
        tracing::debug!(object = %describe(&object), "Creating object");
        self.inner.create(object).await
    }

    async fn update(&self, object: DynamicObject) -> Result<DynamicObject> {
        tracing::debug!(
            object = %describe(&object),
            resource_version = ?object.resource_version(),
            "Updating object"
        );
        let result = self.inner.update(object).await;
        if let Ok(ref updated) = result {
            tracing::trace!(resource_version = ?updated.resource_version(), "Object updated");
        }
        result
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        key: &NamespacedName,
    ) -> Result<DynamicObject> {
        tracing::debug!(object = %ObjectReference::new(gvk, key), "Deleting object");
        self.inner.delete(gvk, key).await
    }

    async fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream> {
        tracing::debug!(kind = %gvk, "Opening watch");
        self.inner.watch(gvk).await
    }
}

/// A wrapper that puts a deadline on every store call, so a stuck request
/// cannot wedge a worker.
pub struct TimeoutObjectStore<S: ObjectStore> {
    inner: S,
    deadline: Duration,
}

impl<S: ObjectStore> TimeoutObjectStore<S> {
    /// Create a new timeout object store.
    pub const fn new(inner: S, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        match timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                operation,
                u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for TimeoutObjectStore<S> {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject> {
        self.bounded("get", self.inner.get(gvk, key)).await
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        self.bounded("list", self.inner.list(gvk, namespace)).await
    }

    async fn create(&self, object: DynamicObject) -> Result<DynamicObject> {
        self.bounded("create", self.inner.create(object)).await
    }

    async fn update(&self, object: DynamicObject) -> Result<DynamicObject> {
        self.bounded("update", self.inner.update(object)).await
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        key: &NamespacedName,
    ) -> Result<DynamicObject> {
        self.bounded("delete", self.inner.delete(gvk, key)).await
    }

    // Only establishing the watch is bounded; the stream itself is long-lived.
    async fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream> {
        self.bounded("watch", self.inner.watch(gvk)).await
    }
}
