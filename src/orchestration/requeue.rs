//! # Requeue Policy
//!
//! Decides when an instance is reconciled again after a pass. Watch events
//! wake instances on their own; this policy covers everything a watch event
//! would not: backing off while a collaborator is not ready, retrying after a
//! lost write race, and an optional periodic resync of converged instances.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::{BackoffConfig, RequeueConfig};
use crate::models::{ConditionType, ObjectKey};
use crate::orchestration::error_classifier::ErrorCategory;

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassOutcome {
    /// Every stage is ready
    Converged,
    /// A stage is waiting on a collaborator or on its own artifacts
    Progressing { stage: ConditionType },
    /// A stage failed; the failure is visible on its condition
    Failed {
        stage: Option<ConditionType>,
        category: ErrorCategory,
    },
    /// An optimistic write lost a race; nothing was persisted
    Conflict,
    /// The instance is gone, or its teardown completed
    Finished,
}

impl PassOutcome {
    pub fn blocking_stage(&self) -> Option<ConditionType> {
        match self {
            PassOutcome::Progressing { stage } => Some(*stage),
            PassOutcome::Failed { stage, .. } => *stage,
            _ => None,
        }
    }
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassOutcome::Converged => write!(f, "converged"),
            PassOutcome::Progressing { .. } => write!(f, "progressing"),
            PassOutcome::Failed { category, .. } => write!(f, "failed ({category})"),
            PassOutcome::Conflict => write!(f, "conflict"),
            PassOutcome::Finished => write!(f, "finished"),
        }
    }
}

/// When to run the next pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequeueDecision {
    /// Only a watch event triggers the next pass
    None,
    Immediate,
    After(Duration),
}

/// Per-instance backoff bookkeeping
#[derive(Debug)]
pub struct RequeuePolicy {
    backoff: BackoffConfig,
    resync_ready: Option<Duration>,
    attempts: DashMap<ObjectKey, u32>,
}

impl RequeuePolicy {
    pub fn new(backoff: BackoffConfig, requeue: &RequeueConfig) -> Self {
        Self {
            backoff,
            resync_ready: requeue.resync_ready(),
            attempts: DashMap::new(),
        }
    }

    pub fn decide(&self, instance: &ObjectKey, outcome: &PassOutcome) -> RequeueDecision {
        let decision = match outcome {
            PassOutcome::Converged => {
                self.forget(instance);
                self.resync_ready
                    .map_or(RequeueDecision::None, RequeueDecision::After)
            }
            PassOutcome::Finished => {
                self.forget(instance);
                RequeueDecision::None
            }
            PassOutcome::Conflict => RequeueDecision::Immediate,
            PassOutcome::Progressing { .. } | PassOutcome::Failed { .. } => {
                let attempt = {
                    let mut entry = self.attempts.entry(instance.clone()).or_insert(0);
                    let attempt = *entry;
                    *entry = entry.saturating_add(1);
                    attempt
                };
                RequeueDecision::After(self.backoff.delay_for_attempt(attempt))
            }
        };

        debug!(
            instance = %instance,
            outcome = %outcome,
            decision = ?decision,
            "Requeue decision"
        );
        decision
    }

    /// Consecutive non-converged passes recorded for `instance`
    pub fn attempts(&self, instance: &ObjectKey) -> u32 {
        self.attempts.get(instance).map(|a| *a).unwrap_or(0)
    }

    pub fn forget(&self, instance: &ObjectKey) {
        self.attempts.remove(instance);
    }
}
