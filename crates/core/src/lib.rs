//! Core types, errors, and utilities for converge.
//!
//! - **Object model**: `DynamicObject`, `ObjectMeta`, `OwnerReference` and the
//!   identity types the engine keys work on
//! - **Manifests**: YAML/JSON object loading
//! - **Config**: file loading helpers shared by every crate's config types

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod manifest;
pub mod object;

pub use error::{Error, Result};
pub use manifest::{ManifestFormat, load_manifests, parse_manifests};
pub use object::{
    DynamicObject, GroupKind, GroupVersionKind, NamespacedName, ObjectMeta, ObjectReference,
    OwnerReference,
};
