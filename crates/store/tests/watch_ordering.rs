//! Watch delivery order under concurrent writers.
//!
//! Per object, notifications must arrive in store-write order; across objects
//! no order is promised.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::arithmetic_side_effects)]

use std::collections::HashMap;
use std::sync::Arc;

use converge_core::{DynamicObject, GroupVersionKind, NamespacedName};
use converge_store::{EventType, InMemoryObjectStore, ObjectStore};
use futures::StreamExt;

const OBJECTS: usize = 4;
const WRITES_PER_OBJECT: usize = 25;

fn config_map() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "ConfigMap")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_concurrent_writers_when_watching_then_per_object_order_is_preserved() {
    let store = Arc::new(InMemoryObjectStore::new());
    for i in 0..OBJECTS {
        store
            .create(DynamicObject::new(&config_map(), format!("cm{i}")).within("default"))
            .await
            .unwrap();
    }

    // Given: a watch opened after the objects exist
    let mut watch = store.watch(&config_map()).await.unwrap();

    // When: every object is rewritten concurrently
    let writers: Vec<_> = (0..OBJECTS)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let key = NamespacedName::new("default", format!("cm{i}"));
                for n in 0..WRITES_PER_OBJECT {
                    let current = store.get(&config_map(), &key).await.unwrap();
                    store
                        .update(current.with_label("n", n.to_string()))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    // Then: replayed creates come first, then each object's updates in order
    let mut last_version: HashMap<NamespacedName, u64> = HashMap::new();
    let mut updates = 0;
    while updates < OBJECTS * WRITES_PER_OBJECT {
        let event = watch.next().await.unwrap().unwrap();
        let version: u64 = event.object().resource_version().unwrap().parse().unwrap();
        let previous = last_version.insert(event.key(), version);
        if let Some(previous) = previous {
            assert!(version > previous, "out of order for {}", event.key());
        }
        if event.event_type() == EventType::Update {
            updates += 1;
        }
    }
}
