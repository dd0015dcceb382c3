//! Versioned object store client.
//!
//! The persistent store itself is an external collaborator; this crate is the
//! seam the reconciliation engine talks through:
//!
//! - **`ObjectStore`**: get/list/create/update/delete/watch keyed by
//!   group-version-kind and namespaced name
//! - **`ChangeEvent`**: create/update/delete notifications from a watch
//! - **`InMemoryObjectStore`**: reference backend with optimistic concurrency
//! - **Decorators**: `TracingObjectStore` and `TimeoutObjectStore`
//!
//! # Example
//!
//! ```ignore
//! use converge_core::{DynamicObject, GroupVersionKind};
//! use converge_store::{InMemoryObjectStore, ObjectStore};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryObjectStore::new();
//!     let gvk = GroupVersionKind::gvk("apps", "v1", "ReplicaSet");
//!
//!     let mut watch = store.watch(&gvk).await.unwrap();
//!     store.create(DynamicObject::new(&gvk, "rs1").within("default")).await.unwrap();
//!
//!     let event = watch.next().await.unwrap().unwrap();
//!     println!("{} {}", event.event_type(), event.key());
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use error::{Error, Result};
pub use event::{ChangeEvent, EventType};
pub use memory::InMemoryObjectStore;
pub use store::{ObjectStore, TimeoutObjectStore, TracingObjectStore, WatchStream};
