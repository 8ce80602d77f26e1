//! In-memory [`ObjectStore`] with optimistic concurrency and watch support.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{ObjectStore, WatchEvent, WatchEventType};
use crate::error::{StoreError, StoreResult};
use crate::models::{ObjectKey, ObjectKind, StoredObject};

const WATCH_CAPACITY: usize = 1024;

type Entries = BTreeMap<(ObjectKind, ObjectKey), StoredObject>;

/// Thread-safe in-memory object store
pub struct InMemoryStore {
    objects: RwLock<Entries>,
    /// Cluster-wide version counter, every write takes the next value
    version: AtomicU64,
    /// Number of successful writes, for idempotence checks
    writes: AtomicU64,
    /// Number of upcoming writes to reject with a conflict
    injected_conflicts: AtomicUsize,
    events: broadcast::Sender<WatchEvent>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("objects", &self.objects.read().len())
            .field("version", &self.version.load(Ordering::Acquire))
            .field("writes", &self.writes.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            injected_conflicts: AtomicUsize::new(0),
            events,
        }
    }

    /// Total successful writes since creation
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Reject the next `count` writes with a conflict, as if a concurrent
    /// writer had raced ahead.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::Release);
    }

    /// Stored objects owned by `owner`
    pub fn owned_by(&self, owner: &ObjectKey) -> Vec<StoredObject> {
        self.objects
            .read()
            .values()
            .filter(|o| o.metadata.owner.as_ref() == Some(owner))
            .cloned()
            .collect()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn take_injected_conflict(&self, kind: ObjectKind, key: &ObjectKey) -> StoreResult<()> {
        let injected = self
            .injected_conflicts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if injected.is_ok() {
            debug!(kind = %kind, key = %key, "Injected write conflict");
            let current = self.version.load(Ordering::Acquire);
            return Err(StoreError::Conflict {
                kind,
                key: key.clone(),
                expected: current,
                actual: current + 1,
            });
        }
        Ok(())
    }

    fn publish(&self, event_type: WatchEventType, object: &StoredObject) {
        self.writes.fetch_add(1, Ordering::AcqRel);
        trace!(
            event = ?event_type,
            kind = %object.kind,
            key = %object.key(),
            resource_version = object.metadata.resource_version,
            "Store event"
        );
        // no receivers is fine
        let _ = self.events.send(WatchEvent {
            event_type,
            object: object.clone(),
        });
    }

    fn check_version(stored: &StoredObject, incoming: &StoredObject) -> StoreResult<()> {
        if stored.metadata.resource_version != incoming.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: incoming.kind,
                key: incoming.key().clone(),
                expected: incoming.metadata.resource_version,
                actual: stored.metadata.resource_version,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> StoreResult<Option<StoredObject>> {
        Ok(self.objects.read().get(&(kind, key.clone())).cloned())
    }

    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<StoredObject>> {
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|((k, key), _)| *k == kind && namespace.map_or(true, |ns| key.namespace == ns))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        self.take_injected_conflict(object.kind, object.key())?;
        let created = {
            let mut objects = self.objects.write();
            let id = (object.kind, object.key().clone());
            if objects.contains_key(&id) {
                return Err(StoreError::AlreadyExists {
                    kind: object.kind,
                    key: object.key().clone(),
                });
            }
            object.metadata.resource_version = self.next_version();
            object.metadata.generation = 1;
            object.metadata.deletion_timestamp = None;
            objects.insert(id, object.clone());
            object
        };
        self.publish(WatchEventType::Added, &created);
        Ok(created)
    }

    async fn update(&self, mut object: StoredObject) -> StoreResult<StoredObject> {
        self.take_injected_conflict(object.kind, object.key())?;
        let (event_type, updated) = {
            let mut objects = self.objects.write();
            let id = (object.kind, object.key().clone());
            let stored = objects.get(&id).ok_or_else(|| StoreError::NotFound {
                kind: object.kind,
                key: object.key().clone(),
            })?;
            Self::check_version(stored, &object)?;

            // status and deletion marker are not writable through update
            object.status = stored.status.clone();
            object.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
            object.metadata.generation = if stored.spec != object.spec {
                stored.metadata.generation + 1
            } else {
                stored.metadata.generation
            };
            object.metadata.resource_version = self.next_version();

            if object.metadata.is_being_deleted() && object.metadata.finalizers.is_empty() {
                objects.remove(&id);
                (WatchEventType::Deleted, object)
            } else {
                objects.insert(id, object.clone());
                (WatchEventType::Modified, object)
            }
        };
        self.publish(event_type, &updated);
        Ok(updated)
    }

    async fn update_status(&self, object: StoredObject) -> StoreResult<StoredObject> {
        self.take_injected_conflict(object.kind, object.key())?;
        let updated = {
            let mut objects = self.objects.write();
            let id = (object.kind, object.key().clone());
            let stored = objects.get_mut(&id).ok_or_else(|| StoreError::NotFound {
                kind: object.kind,
                key: object.key().clone(),
            })?;
            Self::check_version(stored, &object)?;
            stored.status = object.status;
            stored.metadata.resource_version = self.next_version();
            stored.clone()
        };
        self.publish(WatchEventType::Modified, &updated);
        Ok(updated)
    }

    async fn delete(&self, kind: ObjectKind, key: &ObjectKey) -> StoreResult<()> {
        let (event_type, object) = {
            let mut objects = self.objects.write();
            let id = (kind, key.clone());
            let stored = objects.get_mut(&id).ok_or_else(|| StoreError::NotFound {
                kind,
                key: key.clone(),
            })?;
            if stored.metadata.finalizers.is_empty() {
                let removed = objects.remove(&id).ok_or_else(|| StoreError::NotFound {
                    kind,
                    key: key.clone(),
                })?;
                (WatchEventType::Deleted, removed)
            } else {
                if stored.metadata.deletion_timestamp.is_some() {
                    return Ok(());
                }
                stored.metadata.deletion_timestamp = Some(Utc::now());
                stored.metadata.resource_version = self.next_version();
                (WatchEventType::Modified, stored.clone())
            }
        };
        self.publish(event_type, &object);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
