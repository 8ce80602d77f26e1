//! # Heat Reconciler
//!
//! Drives one reconcile pass for one instance:
//!
//! 1. Load the instance; nothing to do when it is gone.
//! 2. Deletion requested: release every collaborator request, remove every
//!    owned artifact, then drop the finalizer.
//! 3. Ensure the finalizer and initialise missing conditions to `Unknown`.
//! 4. Probe the collaborators, run the stage sequencer and aggregate `Ready`.
//! 5. Persist the status once, only if it changed, against the resource
//!    version the pass started from.
//!
//! A pass never blocks waiting for an external system. It reports where it
//! stopped and lets the [`RequeuePolicy`] decide when to look again. A write
//! conflict anywhere in the pass discards the pass and asks for an immediate
//! retry.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::config::{DefaultsConfig, ReconcilerConfig};
use crate::constants::FINALIZER;
use crate::error::{ReconcileError, ReconcileResult, StoreError};
use crate::logging::{log_error, log_pass_outcome, log_stage_transition};
use crate::models::heat::{database_key, transport_url_key};
use crate::models::{
    reasons, ConditionType, HeatInstance, HeatStatus, ObjectKey, ObjectKind, StoredObject,
};
use crate::orchestration::aggregator::aggregate;
use crate::orchestration::artifacts::ArtifactApplier;
use crate::orchestration::dependency_probe::DependencyProbe;
use crate::orchestration::error_classifier::{
    ErrorCategory, ErrorClassifier, StandardErrorClassifier,
};
use crate::orchestration::requeue::{PassOutcome, RequeueDecision, RequeuePolicy};
use crate::orchestration::sequencer::{SequenceReport, StageSequencer};
use crate::orchestration::stages::PassContext;

/// Kinds swept for owned objects during teardown
const OWNED_KINDS: [ObjectKind; 5] = [
    ObjectKind::ConfigMap,
    ObjectKind::Job,
    ObjectKind::Deployment,
    ObjectKind::TransportUrl,
    ObjectKind::MariaDbDatabase,
];

/// Summary of one pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub instance: ObjectKey,
    pub outcome: PassOutcome,
    pub requeue: RequeueDecision,
    /// Store writes performed by the pass, the status write included
    pub writes: u64,
}

/// Reconciles `Heat` instances against their collaborators
#[derive(Debug)]
pub struct HeatReconciler {
    collaborators: Collaborators,
    probe: DependencyProbe,
    sequencer: StageSequencer,
    requeue: RequeuePolicy,
    classifier: StandardErrorClassifier,
    images: DefaultsConfig,
}

impl HeatReconciler {
    pub fn new(collaborators: Collaborators, config: &ReconcilerConfig) -> ReconcileResult<Self> {
        let sequencer = StageSequencer::heat(config.sequencing.mode)?;
        Ok(Self {
            probe: DependencyProbe::new(collaborators.clone()),
            collaborators,
            sequencer,
            requeue: RequeuePolicy::new(config.backoff.clone(), &config.requeue),
            classifier: StandardErrorClassifier::new(),
            images: config.defaults.clone(),
        })
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn sequencer(&self) -> &StageSequencer {
        &self.sequencer
    }

    pub fn requeue_policy(&self) -> &RequeuePolicy {
        &self.requeue
    }

    /// Run one pass for `key`.
    ///
    /// Stage failures and write conflicts are part of the report; `Err` means
    /// the pass could not load or persist the instance at all.
    #[instrument(skip_all, fields(instance = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<PassReport> {
        let pass_id = Uuid::new_v4();
        let mut writes = 0;

        let outcome = match self.run_pass(key, &mut writes).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_conflict() => {
                warn!(
                    instance = %key,
                    pass_id = %pass_id,
                    error = %e,
                    "Pass lost a write race, requeueing"
                );
                PassOutcome::Conflict
            }
            Err(e) => {
                log_error("heat_reconciler", "reconcile", &e.to_string(), Some(&key.to_string()));
                return Err(e);
            }
        };

        let requeue = self.requeue.decide(key, &outcome);
        log_pass_outcome(key, &pass_id, &outcome.to_string(), outcome.blocking_stage(), writes);

        Ok(PassReport {
            pass_id,
            instance: key.clone(),
            outcome,
            requeue,
            writes,
        })
    }

    /// Requeue decision for a pass that returned `Err`
    pub fn requeue_after_error(
        &self,
        key: &ObjectKey,
        error: &ReconcileError,
    ) -> RequeueDecision {
        let classification = self.classifier.classify_error(error);
        self.requeue.decide(
            key,
            &PassOutcome::Failed {
                stage: None,
                category: classification.error_category,
            },
        )
    }

    async fn run_pass(&self, key: &ObjectKey, writes: &mut u64) -> ReconcileResult<PassOutcome> {
        let store = &self.collaborators.store;
        let Some(object) = store.get(ObjectKind::Heat, key).await? else {
            debug!(instance = %key, "Instance not found, nothing to reconcile");
            self.requeue.forget(key);
            return Ok(PassOutcome::Finished);
        };

        if object.metadata.is_being_deleted() {
            self.teardown(object, writes).await?;
            return Ok(PassOutcome::Finished);
        }

        let object = self.ensure_finalizer(object, writes).await?;
        let instance = match HeatInstance::from_object(&object) {
            Ok(instance) => instance,
            Err(e) => return self.reject_malformed(object, &e, writes).await,
        };

        let facts = self.probe.probe(&instance).await;
        let mut ctx = PassContext::new(
            instance.clone(),
            facts,
            self.collaborators.clone(),
            self.images.clone(),
        );
        ctx.status.conditions.init_missing();

        let report = self.sequencer.run(&mut ctx).await?;
        *writes += ctx.writes;

        let previous_ready = ctx.status.conditions.status(ConditionType::Ready);
        let ready = aggregate(&ctx.status.conditions, self.sequencer.order());
        if ready.status != previous_ready {
            log_stage_transition(
                key,
                ConditionType::Ready,
                previous_ready,
                ready.status,
                &ready.reason,
                &ready.message,
            );
        }
        ctx.status.conditions.set(ready);
        ctx.status.observed_generation = instance.metadata.generation;

        if ctx.status != instance.status {
            let mut updated = object;
            updated.status = serde_json::to_value(&ctx.status).map_err(StoreError::from)?;
            store.update_status(updated).await?;
            *writes += 1;
        } else {
            debug!(instance = %key, "Status unchanged, skipping write");
        }

        Ok(self.outcome(&ctx, &report))
    }

    /// Record an instance that does not deserialize on `InputReady`; no other
    /// stage runs
    async fn reject_malformed(
        &self,
        object: StoredObject,
        error: &StoreError,
        writes: &mut u64,
    ) -> ReconcileResult<PassOutcome> {
        let key = object.key().clone();
        warn!(instance = %key, error = %error, "Instance is malformed");

        let previous: HeatStatus = object.status_as().unwrap_or_default();
        let mut status = previous.clone();
        status.conditions.init_missing();
        status.conditions.mark_false(
            ConditionType::InputReady,
            reasons::ERROR,
            format!("invalid spec: {error}"),
        );
        let ready = aggregate(&status.conditions, self.sequencer.order());
        if ready.status != previous.conditions.status(ConditionType::Ready) {
            log_stage_transition(
                &key,
                ConditionType::Ready,
                previous.conditions.status(ConditionType::Ready),
                ready.status,
                &ready.reason,
                &ready.message,
            );
        }
        status.conditions.set(ready);
        status.observed_generation = object.metadata.generation;

        if status != previous {
            let mut updated = object;
            updated.status = serde_json::to_value(&status).map_err(StoreError::from)?;
            self.collaborators.store.update_status(updated).await?;
            *writes += 1;
        }
        Ok(PassOutcome::Failed {
            stage: Some(ConditionType::InputReady),
            category: ErrorCategory::PermanentFailure,
        })
    }

    fn outcome(&self, ctx: &PassContext, report: &SequenceReport) -> PassOutcome {
        let Some(stage) = report
            .first_not_ready
            .or_else(|| report.skipped.first().copied())
        else {
            return PassOutcome::Converged;
        };

        if let Some((failed_stage, category)) = report.failure {
            return PassOutcome::Failed {
                stage: Some(failed_stage),
                category,
            };
        }
        let failed = ctx
            .status
            .conditions
            .get(stage)
            .is_some_and(|c| c.reason == reasons::ERROR);
        if failed {
            PassOutcome::Failed {
                stage: Some(stage),
                category: ErrorCategory::PermanentFailure,
            }
        } else {
            PassOutcome::Progressing { stage }
        }
    }

    async fn ensure_finalizer(
        &self,
        mut object: StoredObject,
        writes: &mut u64,
    ) -> ReconcileResult<StoredObject> {
        if object.metadata.has_finalizer(FINALIZER) {
            return Ok(object);
        }
        object.metadata.finalizers.push(FINALIZER.to_string());
        let updated = self.collaborators.store.update(object).await?;
        *writes += 1;
        debug!(instance = %updated.key(), "Finalizer added");
        Ok(updated)
    }

    /// Remove everything the instance owns, then let the store delete it.
    /// Works from the object key alone, a malformed spec does not block it.
    async fn teardown(&self, mut object: StoredObject, writes: &mut u64) -> ReconcileResult<()> {
        let key = object.key().clone();
        info!(instance = %key, "Tearing down instance");

        self.collaborators
            .message_bus
            .release_transport_url(&transport_url_key(&key))
            .await?;
        self.collaborators
            .databases
            .release_database(&database_key(&key))
            .await?;
        self.collaborators
            .identity
            .deregister_stack_domain(&key)
            .await?;

        let applier = ArtifactApplier::new(self.collaborators.store.clone());
        for kind in OWNED_KINDS {
            let owned = self
                .collaborators
                .store
                .list(kind, Some(&key.namespace))
                .await?;
            for item in owned
                .iter()
                .filter(|o| o.metadata.owner.as_ref() == Some(&key))
            {
                if applier.delete(kind, item.key()).await? {
                    *writes += 1;
                }
            }
        }

        if object.metadata.has_finalizer(FINALIZER) {
            object.metadata.finalizers.retain(|f| f != FINALIZER);
            self.collaborators.store.update(object).await?;
            *writes += 1;
        }
        self.requeue.forget(&key);
        info!(instance = %key, "Teardown complete, finalizer removed");
        Ok(())
    }
}
