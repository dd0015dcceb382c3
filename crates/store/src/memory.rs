//! In-memory object store.
//!
//! Behaves like a single-node apiserver: optimistic concurrency on
//! `resourceVersion`, generation bumps on non-metadata changes, no-op updates
//! that neither bump versions nor notify watchers, and watches that begin
//! with a synthetic `Create` per existing object.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use converge_core::{DynamicObject, GroupVersionKind, NamespacedName};
use futures::StreamExt;
use futures::future::ready;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::event::ChangeEvent;
use crate::store::{ObjectStore, WatchStream};

/// Default number of buffered notifications per watcher before it lags.
const DEFAULT_WATCH_CAPACITY: usize = 1024;

type Bucket = BTreeMap<NamespacedName, DynamicObject>;

/// In-memory object store for tests and local runs.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<GroupVersionKind, Bucket>>,
    resource_version: AtomicU64,
    events: broadcast::Sender<ChangeEvent>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store.
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Create a store whose watchers lag (and must re-watch) after
    /// `capacity` undelivered notifications.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            objects: RwLock::new(HashMap::new()),
            resource_version: AtomicU64::new(0),
            events,
        }
    }

    /// The most recently issued resource version.
    pub fn current_resource_version(&self) -> u64 {
        self.resource_version.load(Ordering::Acquire)
    }

    fn next_resource_version(&self) -> String {
        self.resource_version
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
            .to_string()
    }

    /// Notify watchers. Called with the write lock held so notifications
    /// follow write order.
    fn notify(&self, event: ChangeEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
    }
}

/// The object with store-managed metadata copied from `current`, for
/// comparing what a write would actually change.
fn with_managed_fields(object: &DynamicObject, current: &DynamicObject) -> DynamicObject {
    let mut candidate = object.clone();
    candidate.metadata.uid.clone_from(&current.metadata.uid);
    candidate
        .metadata
        .resource_version
        .clone_from(&current.metadata.resource_version);
    candidate.metadata.generation = current.metadata.generation;
    candidate.metadata.creation_timestamp = current.metadata.creation_timestamp;
    candidate
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject> {
        let objects = self.objects.read().await;
        objects
            .get(gvk)
            .and_then(|bucket| bucket.get(key))
            .cloned()
            .ok_or_else(|| Error::not_found(&gvk.kind, key.clone()))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let objects = self.objects.read().await;
        Ok(objects
            .get(gvk)
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|o| namespace.is_none_or(|ns| o.namespace() == ns))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, mut object: DynamicObject) -> Result<DynamicObject> {
        object.validate()?;
        let gvk = object.gvk()?;
        let key = object.key();

        let mut objects = self.objects.write().await;
        let bucket = objects.entry(gvk.clone()).or_default();
        if bucket.contains_key(&key) {
            return Err(Error::already_exists(&gvk.kind, key));
        }

        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(Ulid::new().to_string());
        }
        object.metadata.creation_timestamp = Some(Utc::now());
        object.metadata.generation = Some(1);
        object.metadata.resource_version = Some(self.next_resource_version());

        bucket.insert(key.clone(), object.clone());
        debug!(kind = %gvk, key = %key, "Object created");
        self.notify(ChangeEvent::created(object.clone()));
        Ok(object)
    }

    async fn update(&self, object: DynamicObject) -> Result<DynamicObject> {
        object.validate()?;
        let gvk = object.gvk()?;
        let key = object.key();

        let mut objects = self.objects.write().await;
        let current = objects
            .get_mut(&gvk)
            .and_then(|bucket| bucket.get_mut(&key))
            .ok_or_else(|| Error::not_found(&gvk.kind, key.clone()))?;

        if let Some(expected) = object.resource_version() {
            let actual = current.resource_version().unwrap_or_default();
            if expected != actual {
                return Err(Error::conflict(&gvk.kind, key, expected, actual));
            }
        }

        let mut candidate = with_managed_fields(&object, current);
        if candidate == *current {
            debug!(kind = %gvk, key = %key, "Update is a no-op");
            return Ok(candidate);
        }

        if candidate.data != current.data {
            candidate.metadata.generation =
                Some(current.metadata.generation.unwrap_or(0).saturating_add(1));
        }
        candidate.metadata.resource_version = Some(self.next_resource_version());

        let previous = std::mem::replace(current, candidate.clone());
        debug!(
            kind = %gvk,
            key = %key,
            resource_version = ?candidate.resource_version(),
            "Object updated"
        );
        self.notify(ChangeEvent::updated(Some(previous), candidate.clone()));
        Ok(candidate)
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        key: &NamespacedName,
    ) -> Result<DynamicObject> {
        let mut objects = self.objects.write().await;
        let removed = objects
            .get_mut(gvk)
            .and_then(|bucket| bucket.remove(key))
            .ok_or_else(|| Error::not_found(&gvk.kind, key.clone()))?;

        // A delete is a write: it consumes a resource version too.
        let _ = self.next_resource_version();
        debug!(kind = %gvk, key = %key, "Object deleted");
        self.notify(ChangeEvent::deleted(removed.clone()));
        Ok(removed)
    }

    async fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream> {
        // Subscribe under the read lock: writers notify under the write lock,
        // so the snapshot and the live stream meet without a gap.
        let objects = self.objects.read().await;
        let receiver = self.events.subscribe();
        let initial: Vec<Result<ChangeEvent>> = objects
            .get(gvk)
            .map(|bucket| {
                bucket
                    .values()
                    .cloned()
                    .map(|o| Ok(ChangeEvent::created(o)))
                    .collect()
            })
            .unwrap_or_default();
        drop(objects);

        debug!(kind = %gvk, replayed = initial.len(), "Watch opened");

        let api_version = gvk.api_version();
        let kind = gvk.kind.clone();
        let live = BroadcastStream::new(receiver).filter_map(move |received| {
            let next = match received {
                Ok(event) => {
                    let object = event.object();
                    (object.api_version == api_version && object.kind == kind).then_some(Ok(event))
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => Some(Err(Error::watch_expired(
                    kind.clone(),
                    format!("watcher fell behind by {missed} events"),
                ))),
            };
            ready(next)
        });

        Ok(futures::stream::iter(initial).chain(live).boxed())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::event::EventType;

    fn replica_set() -> GroupVersionKind {
        GroupVersionKind::gvk("apps", "v1", "ReplicaSet")
    }

    fn rs1_key() -> NamespacedName {
        NamespacedName::new("default", "rs1")
    }

    async fn seeded() -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new();
        store
            .create(DynamicObject::new(&replica_set(), "rs1").within("default"))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_assigns_managed_metadata() {
        let store = seeded().await;
        let rs = store.get(&replica_set(), &rs1_key()).await.unwrap();

        assert!(rs.metadata.uid.is_some());
        assert!(rs.metadata.creation_timestamp.is_some());
        assert_eq!(rs.metadata.generation, Some(1));
        assert_eq!(rs.resource_version(), Some("1"));
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() {
        let store = seeded().await;
        let err = store
            .create(DynamicObject::new(&replica_set(), "rs1").within("default"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryObjectStore::new();
        let err = store.get(&replica_set(), &rs1_key()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = seeded().await;
        let stale = store.get(&replica_set(), &rs1_key()).await.unwrap();

        let mut fresh = stale.clone();
        fresh.labels_mut().insert("a".into(), "1".into());
        store.update(fresh).await.unwrap();

        let mut racing = stale;
        racing.labels_mut().insert("b".into(), "2".into());
        let err = store.update(racing).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_noop_update_does_not_bump_version() {
        let store = seeded().await;
        let rs = store.get(&replica_set(), &rs1_key()).await.unwrap();

        let updated = store.update(rs.clone()).await.unwrap();
        assert_eq!(updated.resource_version(), rs.resource_version());
        assert_eq!(store.current_resource_version(), 1);
    }

    #[tokio::test]
    async fn test_generation_tracks_non_metadata_changes() {
        let store = seeded().await;
        let rs = store.get(&replica_set(), &rs1_key()).await.unwrap();

        let labelled = store
            .update(rs.with_label("hello", "world"))
            .await
            .unwrap();
        assert_eq!(labelled.metadata.generation, Some(1));

        let scaled = store
            .update(labelled.with_field("spec", serde_json::json!({"replicas": 2})))
            .await
            .unwrap();
        assert_eq!(scaled.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_list_filters_namespace() {
        let store = seeded().await;
        store
            .create(DynamicObject::new(&replica_set(), "rs2").within("other"))
            .await
            .unwrap();

        assert_eq!(store.list(&replica_set(), None).await.unwrap().len(), 2);
        assert_eq!(
            store.list(&replica_set(), Some("other")).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_watch_replays_then_follows() {
        let store = seeded().await;
        let mut watch = store.watch(&replica_set()).await.unwrap();

        let replayed = watch.next().await.unwrap().unwrap();
        assert_eq!(replayed.event_type(), EventType::Create);
        assert_eq!(replayed.key(), rs1_key());

        let deleted = store.delete(&replica_set(), &rs1_key()).await.unwrap();
        let event = watch.next().await.unwrap().unwrap();
        assert_eq!(event.event_type(), EventType::Delete);
        assert_eq!(event.object(), &deleted);
    }

    #[tokio::test]
    async fn test_watch_ignores_other_kinds() {
        let store = InMemoryObjectStore::new();
        let mut watch = store.watch(&replica_set()).await.unwrap();

        let pod = GroupVersionKind::gvk("", "v1", "Pod");
        store
            .create(DynamicObject::new(&pod, "p1").within("default"))
            .await
            .unwrap();
        store
            .create(DynamicObject::new(&replica_set(), "rs1").within("default"))
            .await
            .unwrap();

        let event = watch.next().await.unwrap().unwrap();
        assert_eq!(event.object().kind, "ReplicaSet");
    }

    #[tokio::test]
    async fn test_lagging_watcher_gets_expired_error() {
        let store = InMemoryObjectStore::with_watch_capacity(1);
        let mut watch = store.watch(&replica_set()).await.unwrap();

        for name in ["a", "b", "c"] {
            store
                .create(DynamicObject::new(&replica_set(), name).within("default"))
                .await
                .unwrap();
        }

        let first = watch.next().await.unwrap();
        assert!(matches!(first, Err(Error::WatchExpired { .. })));
    }
}
