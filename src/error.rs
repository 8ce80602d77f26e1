//! Error types for the Heat reconciler.

use crate::config::ConfigurationError;
use crate::models::{ObjectKey, ObjectKind};
use thiserror::Error;

/// Errors raised by an [`ObjectStore`](crate::store::ObjectStore) implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ObjectKind, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: ObjectKind, key: ObjectKey },
    /// Optimistic concurrency check failed: the caller wrote against a stale version
    #[error("conflict writing {kind} {key}: expected resource version {expected}, found {actual}")]
    Conflict {
        kind: ObjectKind,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised while running a reconcile pass
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// A collaborator (message bus, database, identity service) rejected a request
    #[error("{collaborator} failed: {reason}")]
    Collaborator {
        collaborator: String,
        reason: String,
    },
    /// Something the pass just wrote does not read back the way it was written
    #[error("invariant violated in {stage}: {detail}")]
    InvariantViolation { stage: String, detail: String },
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<ConfigurationError> for ReconcileError {
    fn from(error: ConfigurationError) -> Self {
        ReconcileError::Configuration(error.to_string())
    }
}

impl ReconcileError {
    pub fn collaborator(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        ReconcileError::Collaborator {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        ReconcileError::InvariantViolation {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error is an optimistic-concurrency conflict on a write
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        let conflict = ReconcileError::from(StoreError::Conflict {
            kind: ObjectKind::ConfigMap,
            key: ObjectKey::new("openstack", "heat-config-data"),
            expected: 3,
            actual: 4,
        });
        assert!(conflict.is_conflict());

        let missing = ReconcileError::from(StoreError::NotFound {
            kind: ObjectKind::Job,
            key: ObjectKey::new("openstack", "heat-db-sync"),
        });
        assert!(!missing.is_conflict());
        assert!(!ReconcileError::invariant("ServiceConfigReady", "hash mismatch").is_conflict());
    }

    #[test]
    fn test_error_display() {
        let err = ReconcileError::collaborator("message bus", "cluster rabbitmq rejected request");
        assert_eq!(
            err.to_string(),
            "message bus failed: cluster rabbitmq rejected request"
        );

        let err = StoreError::NotFound {
            kind: ObjectKind::Deployment,
            key: ObjectKey::new("openstack", "heat-api"),
        };
        assert_eq!(err.to_string(), "Deployment openstack/heat-api not found");
    }
}
