//! # Stage Sequencer
//!
//! Evaluates the stages of one pass in dependency order and records each
//! outcome as the stage's condition on the working status.
//!
//! ## Ordering
//!
//! In [`SequencingMode::HaltOnFirst`] the first stage that is not ready ends
//! the pass: nothing after it is evaluated, so no later condition can move.
//! [`SequencingMode::IndependentBranches`] evaluates a stage whenever every
//! stage it depends on was ready in this pass, which lets the sub-components
//! converge side by side.
//!
//! ## Failures
//!
//! A stage error is caught at the stage boundary and becomes a False `Error`
//! condition on that stage. Write conflicts are the exception: they abort the
//! whole pass so it can restart from fresh state.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::SequencingMode;
use crate::error::ReconcileResult;
use crate::logging::{log_error, log_stage_transition};
use crate::models::{reasons, Condition, ConditionStatus, ConditionType};
use crate::orchestration::error_classifier::{
    ErrorCategory, ErrorClassifier, StandardErrorClassifier,
};
use crate::orchestration::stage_graph::{StageGraph, StageGraphError};
use crate::orchestration::stages::{heat_stages, PassContext, Stage, StageOutcome};

/// What happened to the stages of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceReport {
    /// Stages evaluated, in evaluation order
    pub evaluated: Vec<ConditionType>,
    /// Stages left alone because a prerequisite was not ready
    pub skipped: Vec<ConditionType>,
    /// First stage in evaluation order that was not ready
    pub first_not_ready: Option<ConditionType>,
    /// First stage whose evaluation failed with an error, and how it was classified
    pub failure: Option<(ConditionType, ErrorCategory)>,
}

impl SequenceReport {
    pub fn is_complete(&self) -> bool {
        self.first_not_ready.is_none() && self.skipped.is_empty()
    }
}

/// Runs stages in topological order
pub struct StageSequencer {
    stages: Vec<Box<dyn Stage>>,
    graph: StageGraph,
    mode: SequencingMode,
    classifier: StandardErrorClassifier,
}

impl std::fmt::Debug for StageSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSequencer")
            .field("order", &self.graph.order())
            .field("mode", &self.mode)
            .finish()
    }
}

impl StageSequencer {
    /// Validate the stage declarations and fix the evaluation order
    pub fn new(stages: Vec<Box<dyn Stage>>, mode: SequencingMode) -> Result<Self, StageGraphError> {
        let graph = StageGraph::new(stages.iter().map(|s| (s.id(), s.depends_on())))?;
        let mut stages = stages;
        stages.sort_by_key(|stage| {
            graph
                .order()
                .iter()
                .position(|id| *id == stage.id())
                .unwrap_or(usize::MAX)
        });
        Ok(Self {
            stages,
            graph,
            mode,
            classifier: StandardErrorClassifier::new(),
        })
    }

    /// The Heat stage graph
    pub fn heat(mode: SequencingMode) -> Result<Self, StageGraphError> {
        Self::new(heat_stages(), mode)
    }

    pub fn order(&self) -> &[ConditionType] {
        self.graph.order()
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn mode(&self) -> SequencingMode {
        self.mode
    }

    /// Evaluate the stages against `ctx`; `Err` only for write conflicts
    pub async fn run(&self, ctx: &mut PassContext) -> ReconcileResult<SequenceReport> {
        let mut report = SequenceReport::default();
        let mut ready: HashSet<ConditionType> = HashSet::new();

        for stage in &self.stages {
            let id = stage.id();

            if report.first_not_ready.is_some() && self.mode == SequencingMode::HaltOnFirst {
                report.skipped.push(id);
                continue;
            }
            if !self.graph.dependencies(id).iter().all(|d| ready.contains(d)) {
                report.skipped.push(id);
                continue;
            }

            let outcome = match stage.evaluate(ctx).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_conflict() => {
                    warn!(
                        instance = %ctx.instance.metadata.key,
                        stage = %id,
                        error = %e,
                        "Write conflict, aborting pass"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let classification = self.classifier.classify_error(&e);
                    log_error(
                        "stage_sequencer",
                        id.as_str(),
                        &e.to_string(),
                        Some(classification.error_code.as_str()),
                    );
                    report
                        .failure
                        .get_or_insert((id, classification.error_category));
                    StageOutcome::not_ready(reasons::ERROR, e.to_string())
                }
            };

            report.evaluated.push(id);
            if outcome.is_ready() {
                ready.insert(id);
            } else {
                report.first_not_ready.get_or_insert(id);
            }
            self.record(ctx, id, outcome);
        }

        debug!(
            instance = %ctx.instance.metadata.key,
            evaluated = report.evaluated.len(),
            skipped = report.skipped.len(),
            first_not_ready = report.first_not_ready.map(|s| s.as_str()),
            "Stage sequence complete"
        );
        Ok(report)
    }

    fn record(&self, ctx: &mut PassContext, id: ConditionType, outcome: StageOutcome) {
        let condition = match outcome {
            StageOutcome::Ready { reason, message } => {
                Condition::new(id, ConditionStatus::True, reason, message)
            }
            StageOutcome::NotReady { reason, message } => {
                Condition::new(id, ConditionStatus::False, reason, message)
            }
            StageOutcome::Waiting { message } => {
                Condition::new(id, ConditionStatus::Unknown, reasons::WAITING, message)
            }
        };

        let previous = ctx.status.conditions.status(id);
        let (to, reason, message) = (
            condition.status,
            condition.reason.clone(),
            condition.message.clone(),
        );
        ctx.status.conditions.set(condition);
        if previous != to {
            log_stage_transition(
                &ctx.instance.metadata.key,
                id,
                previous,
                to,
                &reason,
                &message,
            );
        }
    }
}
