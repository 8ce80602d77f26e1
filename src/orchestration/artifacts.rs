//! # Owned Artifacts
//!
//! One apply primitive for every object the reconciler owns (the config map,
//! the migration job, the three workloads). An [`OwnedArtifact`] describes the
//! desired state; [`ArtifactApplier::ensure`] creates it when absent, updates or
//! recreates it when the desired spec changed, and otherwise does not write.
//!
//! Change detection uses the content hash annotation written at apply time, so
//! a status update from whatever runs the artifact never looks like drift.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::annotations;
use crate::error::{ReconcileResult, StoreError};
use crate::models::{ObjectKey, ObjectKind, ObjectMeta, StoredObject};
use crate::orchestration::config_synthesizer::ConfigPayload;
use crate::store::ObjectStore;

/// How a changed artifact is brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Replace the spec of the existing object
    InPlace,
    /// Delete and create again; for run-to-completion objects
    Recreate,
}

/// Desired state of one owned object
pub trait OwnedArtifact: Send + Sync {
    fn kind(&self) -> ObjectKind;

    fn key(&self) -> &ObjectKey;

    fn desired_spec(&self) -> ReconcileResult<Value>;

    /// Annotations stamped on the object besides the content hash
    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::InPlace
    }

    /// Whether the stored object reports itself ready
    fn is_ready(&self, object: &StoredObject) -> bool;
}

/// Canonical hash of a JSON document; object keys are sorted by `serde_json`
pub fn hash_document(document: &Value) -> String {
    format!("{:x}", Sha256::digest(document.to_string().as_bytes()))
}

/// What [`ArtifactApplier::ensure`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyAction {
    Created,
    Updated,
    Recreated,
    Unchanged,
}

impl ApplyAction {
    pub fn wrote(&self) -> bool {
        !matches!(self, ApplyAction::Unchanged)
    }
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyAction::Created => write!(f, "created"),
            ApplyAction::Updated => write!(f, "updated"),
            ApplyAction::Recreated => write!(f, "recreated"),
            ApplyAction::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Stored state of an artifact after `ensure`
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactState {
    pub action: ApplyAction,
    pub ready: bool,
    pub object: StoredObject,
}

/// Applies [`OwnedArtifact`]s through the object store
#[derive(Clone)]
pub struct ArtifactApplier {
    store: Arc<dyn ObjectStore>,
}

impl fmt::Debug for ArtifactApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactApplier").finish_non_exhaustive()
    }
}

impl ArtifactApplier {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Bring the stored object in line with `artifact`, writing only on change
    pub async fn ensure(
        &self,
        owner: &ObjectKey,
        artifact: &dyn OwnedArtifact,
    ) -> ReconcileResult<ArtifactState> {
        let kind = artifact.kind();
        let key = artifact.key();
        let spec = artifact.desired_spec()?;
        let content_hash = hash_document(&spec);

        let mut metadata_annotations = artifact.annotations();
        metadata_annotations.insert(annotations::CONTENT_HASH.to_string(), content_hash.clone());

        let existing = self.store.get(kind, key).await?;
        let (action, object) = match existing {
            None => {
                let created = self
                    .create(owner, kind, key, spec, metadata_annotations)
                    .await?;
                (ApplyAction::Created, created)
            }
            Some(existing)
                if existing.annotation(annotations::CONTENT_HASH) == Some(content_hash.as_str())
                    && existing.metadata.owner.as_ref() == Some(owner) =>
            {
                (ApplyAction::Unchanged, existing)
            }
            Some(existing) => match artifact.update_policy() {
                UpdatePolicy::InPlace => {
                    let mut desired = existing;
                    desired.spec = spec;
                    desired.metadata.owner = Some(owner.clone());
                    desired.metadata.annotations.extend(metadata_annotations);
                    (ApplyAction::Updated, self.store.update(desired).await?)
                }
                UpdatePolicy::Recreate => {
                    self.delete(kind, key).await?;
                    let created = self
                        .create(owner, kind, key, spec, metadata_annotations)
                        .await?;
                    (ApplyAction::Recreated, created)
                }
            },
        };

        if action.wrote() {
            info!(
                kind = %kind,
                key = %key,
                action = %action,
                content_hash = %content_hash,
                "Applied owned artifact"
            );
        }

        Ok(ArtifactState {
            action,
            ready: artifact.is_ready(&object),
            object,
        })
    }

    /// Delete an owned object; returns false when it did not exist
    pub async fn delete(&self, kind: ObjectKind, key: &ObjectKey) -> ReconcileResult<bool> {
        match self.store.delete(kind, key).await {
            Ok(()) => {
                debug!(kind = %kind, key = %key, "Deleted owned artifact");
                Ok(true)
            }
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(
        &self,
        owner: &ObjectKey,
        kind: ObjectKind,
        key: &ObjectKey,
        spec: Value,
        metadata_annotations: BTreeMap<String, String>,
    ) -> ReconcileResult<StoredObject> {
        let mut metadata = ObjectMeta::new(key.clone()).owned_by(owner);
        metadata.annotations = metadata_annotations;
        Ok(self
            .store
            .create(StoredObject::new(kind, metadata, spec))
            .await?)
    }
}

/// The `<name>-config-data` config map holding the rendered files
#[derive(Debug, Clone)]
pub struct ConfigDataArtifact<'a> {
    pub key: ObjectKey,
    pub payload: &'a ConfigPayload,
    pub config_hash: &'a str,
}

impl OwnedArtifact for ConfigDataArtifact<'_> {
    fn kind(&self) -> ObjectKind {
        ObjectKind::ConfigMap
    }

    fn key(&self) -> &ObjectKey {
        &self.key
    }

    fn desired_spec(&self) -> ReconcileResult<Value> {
        Ok(serde_json::json!({ "data": self.payload.files }))
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            annotations::CONFIG_HASH.to_string(),
            self.config_hash.to_string(),
        )])
    }

    fn is_ready(&self, _object: &StoredObject) -> bool {
        true
    }
}

/// Spec of the database migration job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSyncJobSpec {
    pub container_image: String,
    pub command: Vec<String>,
    pub config_map: String,
    pub config_hash: String,
}

/// Status reported by whatever runs a job
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub active: i32,
    #[serde(default)]
    pub succeeded: i32,
    #[serde(default)]
    pub failed: i32,
    #[serde(default)]
    pub message: String,
}

impl JobStatus {
    pub fn is_complete(&self) -> bool {
        self.succeeded > 0
    }

    pub fn is_failed(&self) -> bool {
        self.failed > 0 && self.succeeded == 0
    }
}

/// The `<name>-db-sync` job, recreated whenever the configuration hash moves
#[derive(Debug, Clone)]
pub struct DbSyncJobArtifact {
    pub key: ObjectKey,
    pub spec: DbSyncJobSpec,
}

impl OwnedArtifact for DbSyncJobArtifact {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Job
    }

    fn key(&self) -> &ObjectKey {
        &self.key
    }

    fn desired_spec(&self) -> ReconcileResult<Value> {
        Ok(serde_json::to_value(&self.spec).map_err(StoreError::from)?)
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(
            annotations::CONFIG_HASH.to_string(),
            self.spec.config_hash.clone(),
        )])
    }

    fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::Recreate
    }

    fn is_ready(&self, object: &StoredObject) -> bool {
        object
            .status_as::<JobStatus>()
            .map(|status| status.is_complete())
            .unwrap_or(false)
    }
}
