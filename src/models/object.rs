//! # Store Objects
//!
//! The untyped object envelope kept by the object store. Every kind the
//! reconciler touches (the `Heat` instance itself, secrets, owned artifacts and
//! collaborator requests) is stored as a [`StoredObject`] whose `spec` and
//! `status` are JSON documents; typed views deserialize them on demand.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{StoreError, StoreResult};

/// Kinds of objects known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Heat,
    Secret,
    ConfigMap,
    Job,
    Deployment,
    TransportUrl,
    MariaDbDatabase,
    KeystoneApi,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Heat => "Heat",
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
            Self::Job => "Job",
            Self::Deployment => "Deployment",
            Self::TransportUrl => "TransportURL",
            Self::MariaDbDatabase => "MariaDBDatabase",
            Self::KeystoneApi => "KeystoneAPI",
        };
        write!(f, "{name}")
    }
}

/// Namespaced identity of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an owned artifact: same namespace, `<name>-<suffix>`
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self::new(self.namespace.clone(), format!("{}-{suffix}", self.name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata maintained by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: ObjectKey,
    /// Bumped by the store on every successful write
    #[serde(default)]
    pub resource_version: u64,
    /// Bumped by the store whenever `spec` changes
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub owner: Option<ObjectKey>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            resource_version: 0,
            generation: 0,
            owner: None,
            finalizers: Vec::new(),
            annotations: BTreeMap::new(),
            deletion_timestamp: None,
        }
    }

    pub fn owned_by(mut self, owner: &ObjectKey) -> Self {
        self.owner = Some(owner.clone());
        self
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Untyped object envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: serde_json::Value,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, metadata: ObjectMeta, spec: serde_json::Value) -> Self {
        Self {
            kind,
            metadata,
            spec,
            status: serde_json::Value::Null,
        }
    }

    /// Build an object from a typed spec
    pub fn from_spec<S: Serialize>(
        kind: ObjectKind,
        metadata: ObjectMeta,
        spec: &S,
    ) -> StoreResult<Self> {
        Ok(Self::new(kind, metadata, serde_json::to_value(spec)?))
    }

    pub fn key(&self) -> &ObjectKey {
        &self.metadata.key
    }

    pub fn spec_as<T: DeserializeOwned>(&self) -> StoreResult<T> {
        serde_json::from_value(self.spec.clone()).map_err(StoreError::from)
    }

    /// Typed status; a missing (null) status yields `T::default()`
    pub fn status_as<T: DeserializeOwned + Default>(&self) -> StoreResult<T> {
        if self.status.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.status.clone()).map_err(StoreError::from)
    }

    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.metadata.annotations.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_suffix_keys() {
        let key = ObjectKey::new("openstack", "heat");
        assert_eq!(key.with_suffix("config-data").to_string(), "openstack/heat-config-data");
        assert_eq!(key.with_suffix("db-sync").name, "heat-db-sync");
    }

    #[test]
    fn test_null_status_defaults() {
        let object = StoredObject::new(
            ObjectKind::Deployment,
            ObjectMeta::new(ObjectKey::new("openstack", "heat-api")),
            json!({"replicas": 1}),
        );
        let status: BTreeMap<String, i32> = object.status_as().unwrap();
        assert!(status.is_empty());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ObjectKind::TransportUrl.to_string(), "TransportURL");
        assert_eq!(ObjectKind::MariaDbDatabase.to_string(), "MariaDBDatabase");
    }
}
