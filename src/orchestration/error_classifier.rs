//! # Reconcile Error Classification
//!
//! Maps every [`ReconcileError`] onto the four failure classes the requeue
//! policy understands, together with a retry strategy and remediation hints
//! for the structured error log.
//!
//! ## Usage
//!
//! ```rust
//! use heat_reconciler::error::{ReconcileError, StoreError};
//! use heat_reconciler::models::{ObjectKey, ObjectKind};
//! use heat_reconciler::orchestration::error_classifier::{
//!     ErrorCategory, ErrorClassifier, StandardErrorClassifier,
//! };
//!
//! let classifier = StandardErrorClassifier::new();
//! let error = ReconcileError::Store(StoreError::Conflict {
//!     kind: ObjectKind::Heat,
//!     key: ObjectKey::new("openstack", "heat"),
//!     expected: 3,
//!     actual: 4,
//! });
//!
//! let classification = classifier.classify_error(&error);
//! assert_eq!(classification.error_category, ErrorCategory::TransientConflict);
//! assert!(classification.is_retryable);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ReconcileError, StoreError};

/// Failure classes of a reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A collaborator has not produced what the pass needs yet
    DependencyNotReady,

    /// An optimistic write lost a race; the pass restarts from fresh state
    TransientConflict,

    /// The input itself is wrong; only a spec or configuration change helps
    PermanentFailure,

    /// State read back differently from what was just written
    InvariantViolation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::DependencyNotReady => write!(f, "Dependency Not Ready"),
            ErrorCategory::TransientConflict => write!(f, "Transient Conflict"),
            ErrorCategory::PermanentFailure => write!(f, "Permanent Failure"),
            ErrorCategory::InvariantViolation => write!(f, "Invariant Violation"),
        }
    }
}

/// Retry strategy recommendations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Run the pass again right away
    Immediate,

    /// Wait with exponential backoff
    ExponentialBackoff,
}

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub error_category: ErrorCategory,

    pub is_retryable: bool,

    pub retry_strategy: RetryStrategy,

    /// Stable code for log correlation
    pub error_code: String,

    pub error_message: String,

    pub remediation_suggestions: Vec<String>,
}

/// Classification strategy
pub trait ErrorClassifier: Send + Sync {
    fn classify_error(&self, error: &ReconcileError) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

/// Default classifier used by the reconciler
#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_store_error(&self, error: &StoreError) -> (ErrorCategory, &'static str) {
        match error {
            StoreError::Conflict { .. } => (ErrorCategory::TransientConflict, "STORE_CONFLICT"),
            // something moved under the pass; re-read and try again
            StoreError::NotFound { .. } => (ErrorCategory::TransientConflict, "STORE_NOT_FOUND"),
            StoreError::AlreadyExists { .. } => {
                (ErrorCategory::TransientConflict, "STORE_ALREADY_EXISTS")
            }
            StoreError::Unavailable(_) => {
                (ErrorCategory::DependencyNotReady, "STORE_UNAVAILABLE")
            }
            StoreError::Serialization(_) => {
                (ErrorCategory::PermanentFailure, "STORE_SERIALIZATION")
            }
        }
    }

    fn suggestions(&self, category: ErrorCategory) -> Vec<String> {
        match category {
            ErrorCategory::DependencyNotReady => vec![
                "Check the status of the collaborating service".to_string(),
                "The pass is retried with backoff".to_string(),
            ],
            ErrorCategory::TransientConflict => {
                vec!["The pass is retried immediately against fresh state".to_string()]
            }
            ErrorCategory::PermanentFailure => vec![
                "Fix the instance spec or the referenced secret".to_string(),
                "A spec change triggers a new pass".to_string(),
            ],
            ErrorCategory::InvariantViolation => vec![
                "Check for another writer modifying owned artifacts".to_string(),
                "Inspect the artifact annotations".to_string(),
            ],
        }
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(&self, error: &ReconcileError) -> ErrorClassification {
        let (category, code) = match error {
            ReconcileError::Store(store_error) => self.classify_store_error(store_error),
            ReconcileError::Collaborator { .. } => {
                (ErrorCategory::DependencyNotReady, "COLLABORATOR_FAILED")
            }
            ReconcileError::InvariantViolation { .. } => {
                (ErrorCategory::InvariantViolation, "INVARIANT_VIOLATION")
            }
            ReconcileError::InvalidSpec(_) => (ErrorCategory::PermanentFailure, "INVALID_SPEC"),
            ReconcileError::Configuration(_) => {
                (ErrorCategory::PermanentFailure, "CONFIGURATION")
            }
        };

        let retry_strategy = match category {
            ErrorCategory::TransientConflict => RetryStrategy::Immediate,
            _ => RetryStrategy::ExponentialBackoff,
        };

        ErrorClassification {
            error_category: category,
            // the loop never gives up; permanent failures wait for a spec change
            // but are still resynced on the backoff ceiling
            is_retryable: true,
            retry_strategy,
            error_code: code.to_string(),
            error_message: error.to_string(),
            remediation_suggestions: self.suggestions(category),
        }
    }

    fn classifier_name(&self) -> &'static str {
        "StandardErrorClassifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObjectKey, ObjectKind};

    fn classify(error: ReconcileError) -> ErrorClassification {
        StandardErrorClassifier::new().classify_error(&error)
    }

    #[test]
    fn test_conflict_is_immediate() {
        let classification = classify(ReconcileError::Store(StoreError::Conflict {
            kind: ObjectKind::Heat,
            key: ObjectKey::new("openstack", "heat"),
            expected: 1,
            actual: 2,
        }));
        assert_eq!(
            classification.error_category,
            ErrorCategory::TransientConflict
        );
        assert_eq!(classification.retry_strategy, RetryStrategy::Immediate);
        assert_eq!(classification.error_code, "STORE_CONFLICT");
    }

    #[test]
    fn test_collaborator_failure_backs_off() {
        let classification = classify(ReconcileError::collaborator(
            "identity service",
            "connection refused",
        ));
        assert_eq!(
            classification.error_category,
            ErrorCategory::DependencyNotReady
        );
        assert_eq!(
            classification.retry_strategy,
            RetryStrategy::ExponentialBackoff
        );
        assert!(classification.error_message.contains("connection refused"));
    }

    #[test]
    fn test_invalid_spec_is_permanent() {
        let classification = classify(ReconcileError::InvalidSpec(
            "databaseInstance is empty".to_string(),
        ));
        assert_eq!(classification.error_category, ErrorCategory::PermanentFailure);
        assert!(!classification.remediation_suggestions.is_empty());
    }

    #[test]
    fn test_invariant_violation() {
        let classification = classify(ReconcileError::invariant(
            "ServiceConfigReady",
            "hash annotation mismatch",
        ));
        assert_eq!(
            classification.error_category,
            ErrorCategory::InvariantViolation
        );
        assert_eq!(classification.error_code, "INVARIANT_VIOLATION");
    }

    #[test]
    fn test_category_display() {
        assert_eq!(
            ErrorCategory::DependencyNotReady.to_string(),
            "Dependency Not Ready"
        );
        assert_eq!(
            StandardErrorClassifier::new().classifier_name(),
            "StandardErrorClassifier"
        );
    }
}
