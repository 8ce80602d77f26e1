//! # Object Store
//!
//! The cluster is modelled as an eventually consistent store of typed objects
//! with get/list/create/update/delete and watch. Every write is guarded by the
//! object's `resource_version`; a write against a stale version fails with
//! [`StoreError::Conflict`](crate::error::StoreError::Conflict) instead of
//! overwriting a concurrent change.
//!
//! [`memory::InMemoryStore`] is the bundled implementation used by the tests and
//! the validator binary.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StoreResult;
use crate::models::{ObjectKey, ObjectKind, StoredObject};

pub use memory::InMemoryStore;

/// Kind of change carried by a [`WatchEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A change observed on the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub object: StoredObject,
}

/// Storage contract consumed by the reconciler
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> StoreResult<Option<StoredObject>>;

    /// List objects of a kind, optionally restricted to one namespace
    async fn list(&self, kind: ObjectKind, namespace: Option<&str>)
        -> StoreResult<Vec<StoredObject>>;

    /// Create a new object; fails if the key is taken
    async fn create(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Replace metadata and spec; `object.metadata.resource_version` must match the stored one
    async fn update(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Replace status only; `object.metadata.resource_version` must match the stored one
    async fn update_status(&self, object: StoredObject) -> StoreResult<StoredObject>;

    /// Delete an object. Objects carrying finalizers are only marked for deletion
    /// and disappear once the last finalizer is removed through `update`.
    async fn delete(&self, kind: ObjectKind, key: &ObjectKey) -> StoreResult<()>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
