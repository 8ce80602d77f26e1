//! # Stages
//!
//! One [`Stage`] per readiness condition. A stage reads the probe facts and
//! the working status from the [`PassContext`], performs at most the writes
//! its artifact needs, and reports a [`StageOutcome`] that the sequencer turns
//! into the stage's condition. Stages keep no state between passes.
//!
//! Dependency order:
//!
//! ```text
//! InputReady -> TransportURLReady -> ServiceConfigReady -> DBReady
//!     -> DBSyncReady -> StackDomainReady -> { APIReady, CfnAPIReady, EngineReady }
//! ```

use async_trait::async_trait;
use tracing::debug;

use crate::collaborators::{
    Collaborators, DatabaseRequest, RequestChange, StackDomainRegistration, TransportUrlRequest,
};
use crate::config::DefaultsConfig;
use crate::constants::{annotations, defaults, hash_keys};
use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{
    reasons, ConditionType, HeatInstance, HeatStatus, ObjectKey, ObjectKind, SubComponent,
};
use crate::orchestration::artifacts::{
    ApplyAction, ArtifactApplier, ConfigDataArtifact, DbSyncJobArtifact, DbSyncJobSpec, JobStatus,
};
use crate::orchestration::change_gate::needs_apply;
use crate::orchestration::components::WorkloadArtifact;
use crate::orchestration::config_synthesizer::{synthesize, ConfigInputs};
use crate::orchestration::dependency_probe::{DependencyFacts, Probe};

/// Result of evaluating one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Condition True
    Ready { reason: String, message: String },
    /// Condition False: observed and not ready, or failed
    NotReady { reason: String, message: String },
    /// Condition Unknown: the collaborator has not produced an observation yet
    Waiting { message: String },
}

impl StageOutcome {
    pub fn ready(message: impl Into<String>) -> Self {
        StageOutcome::Ready {
            reason: reasons::READY.to_string(),
            message: message.into(),
        }
    }

    pub fn disabled(message: impl Into<String>) -> Self {
        StageOutcome::Ready {
            reason: reasons::DISABLED.to_string(),
            message: message.into(),
        }
    }

    pub fn not_ready(reason: &str, message: impl Into<String>) -> Self {
        StageOutcome::NotReady {
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn waiting(message: impl Into<String>) -> Self {
        StageOutcome::Waiting {
            message: message.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, StageOutcome::Ready { .. })
    }

    /// Map a dependency probe onto an outcome; `Missing` reads as no observation
    fn from_probe<T>(probe: &Probe<T>, ready: &str) -> Self {
        match probe {
            Probe::Ready(_) => StageOutcome::ready(ready),
            Probe::Pending(reason) => StageOutcome::not_ready(reasons::REQUESTED, reason.as_str()),
            Probe::Missing(reason) => StageOutcome::waiting(reason.as_str()),
            Probe::Failed(reason) => StageOutcome::not_ready(reasons::ERROR, reason.as_str()),
        }
    }
}

/// Everything a stage may read or write during one pass
#[derive(Debug)]
pub struct PassContext {
    pub instance: HeatInstance,
    /// Working copy of the status; persisted once at the end of the pass
    pub status: HeatStatus,
    pub facts: DependencyFacts,
    pub collaborators: Collaborators,
    pub applier: ArtifactApplier,
    pub images: DefaultsConfig,
    /// Hash of the configuration applied in this pass
    pub config_hash: Option<String>,
    /// Store writes performed by stages
    pub writes: u64,
}

impl PassContext {
    pub fn new(
        instance: HeatInstance,
        facts: DependencyFacts,
        collaborators: Collaborators,
        images: DefaultsConfig,
    ) -> Self {
        let status = instance.status.clone();
        let applier = ArtifactApplier::new(collaborators.store.clone());
        Self {
            instance,
            status,
            facts,
            collaborators,
            applier,
            images,
            config_hash: None,
            writes: 0,
        }
    }

    pub fn record(&mut self, action: ApplyAction) {
        if action.wrote() {
            self.writes += 1;
        }
    }

    /// Count a request write; a patched request has no current report yet
    fn request_outcome(
        &mut self,
        change: RequestChange,
        kind: &str,
        key: &ObjectKey,
    ) -> Option<StageOutcome> {
        if change.wrote() {
            self.writes += 1;
        }
        (change == RequestChange::Updated).then(|| {
            StageOutcome::not_ready(
                reasons::REQUESTED,
                format!("{kind} {key} updated, waiting for the provisioner"),
            )
        })
    }

    /// Configuration hash applied earlier in this pass
    fn applied_config_hash(&self, stage: ConditionType) -> ReconcileResult<String> {
        self.config_hash.clone().ok_or_else(|| {
            ReconcileError::invariant(
                stage.as_str(),
                "evaluated before the service configuration was applied",
            )
        })
    }
}

/// One node of the convergence graph
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> ConditionType;

    fn depends_on(&self) -> Vec<ConditionType>;

    async fn evaluate(&self, ctx: &mut PassContext) -> ReconcileResult<StageOutcome>;
}

/// Every stage of a Heat deployment, in declaration order
pub fn heat_stages() -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(InputStage),
        Box::new(TransportUrlStage),
        Box::new(ServiceConfigStage),
        Box::new(DatabaseStage),
        Box::new(DbSyncStage),
        Box::new(StackDomainStage),
    ];
    for component in SubComponent::ALL {
        stages.push(Box::new(WorkloadStage { component }));
    }
    stages
}

/// Required spec fields and the credentials secret
#[derive(Debug, Clone, Copy)]
pub struct InputStage;

#[async_trait]
impl Stage for InputStage {
    fn id(&self) -> ConditionType {
        ConditionType::InputReady
    }

    fn depends_on(&self) -> Vec<ConditionType> {
        Vec::new()
    }

    async fn evaluate(&self, ctx: &mut PassContext) -> ReconcileResult<StageOutcome> {
        let missing = ctx.instance.spec.missing_fields();
        if !missing.is_empty() {
            return Ok(StageOutcome::not_ready(
                reasons::ERROR,
                format!("required spec fields are empty: {}", missing.join(", ")),
            ));
        }
        Ok(match &ctx.facts.secret {
            Probe::Ready(_) => StageOutcome::ready("Input data complete"),
            Probe::Missing(reason) => StageOutcome::not_ready(reasons::MISSING, reason.as_str()),
            Probe::Pending(reason) | Probe::Failed(reason) => {
                StageOutcome::not_ready(reasons::ERROR, reason.as_str())
            }
        })
    }
}

/// Message-bus transport URL for the instance
#[derive(Debug, Clone, Copy)]
pub struct TransportUrlStage;

#[async_trait]
impl Stage for TransportUrlStage {
    fn id(&self) -> ConditionType {
        ConditionType::TransportUrlReady
    }

    fn depends_on(&self) -> Vec<ConditionType> {
        vec![ConditionType::InputReady]
    }

    async fn evaluate(&self, ctx: &mut PassContext) -> ReconcileResult<StageOutcome> {
        let request = TransportUrlRequest {
            rabbitmq_cluster_name: ctx.instance.spec.rabbitmq_cluster_name.clone(),
        };
        let key = ctx.instance.transport_url_key();
        let change = ctx
            .collaborators
            .message_bus
            .ensure_transport_url(&ctx.instance.metadata.key, &key, &request)
            .await?;
        if let Some(outcome) = ctx.request_outcome(change, "TransportURL", &key) {
            return Ok(outcome);
        }

        if let Probe::Ready(transport) = &ctx.facts.transport {
            ctx.status.transport_url_secret = transport.secret_name.clone();
        }
        Ok(StageOutcome::from_probe(
            &ctx.facts.transport,
            "TransportURL successfully created",
        ))
    }
}

/// Rendered configuration, gated on its content hash
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfigStage;

#[async_trait]
impl Stage for ServiceConfigStage {
    fn id(&self) -> ConditionType {
        ConditionType::ServiceConfigReady
    }

    fn depends_on(&self) -> Vec<ConditionType> {
        vec![ConditionType::TransportUrlReady]
    }

    async fn evaluate(&self, ctx: &mut PassContext) -> ReconcileResult<StageOutcome> {
        let inputs = ConfigInputs::from_facts(&ctx.facts).ok_or_else(|| {
            ReconcileError::invariant(
                self.id().as_str(),
                "configuration inputs incomplete although dependencies are ready",
            )
        })?;
        let payload = synthesize(&ctx.instance.spec, &inputs);
        let config_hash = payload.content_hash();
        let key = ctx.instance.config_data_key();

        let stored = ctx
            .collaborators
            .store
            .get(ObjectKind::ConfigMap, &key)
            .await?;
        let stored_current = stored
            .as_ref()
            .and_then(|object| object.annotation(annotations::CONFIG_HASH))
            == Some(config_hash.as_str());

        if needs_apply(&config_hash, ctx.status.config_hash()) || !stored_current {
            let artifact = ConfigDataArtifact {
                key: key.clone(),
                payload: &payload,
                config_hash: &config_hash,
            };
            let state = ctx
                .applier
                .ensure(&ctx.instance.metadata.key, &artifact)
                .await?;
            ctx.record(state.action);

            let applied = ctx
                .collaborators
                .store
                .get(ObjectKind::ConfigMap, &key)
                .await?;
            let applied_hash = applied
                .as_ref()
                .and_then(|object| object.annotation(annotations::CONFIG_HASH));
            if applied_hash != Some(config_hash.as_str()) {
                return Err(ReconcileError::invariant(
                    self.id().as_str(),
                    format!(
                        "config map {key} carries hash {:?} after applying {config_hash}",
                        applied_hash
                    ),
                ));
            }
        } else {
            debug!(
                instance = %ctx.instance.metadata.key,
                config_hash = %config_hash,
                "Configuration unchanged, skipping apply"
            );
        }

        ctx.status
            .hash
            .insert(hash_keys::INPUT.to_string(), config_hash.clone());
        ctx.config_hash = Some(config_hash);
        Ok(StageOutcome::ready("Service config create completed"))
    }
}

/// Service database and database user
#[derive(Debug, Clone, Copy)]
pub struct DatabaseStage;

#[async_trait]
impl Stage for DatabaseStage {
    fn id(&self) -> ConditionType {
        ConditionType::DbReady
    }

    fn depends_on(&self) -> Vec<ConditionType> {
        vec![ConditionType::ServiceConfigReady]
    }

    async fn evaluate(&self, ctx: &mut PassContext) -> ReconcileResult<StageOutcome> {
        let request = DatabaseRequest {
            database_instance: ctx.instance.spec.database_instance.clone(),
            database_name: defaults::DATABASE_NAME.to_string(),
            database_user: ctx.instance.spec.database_user.clone(),
            password_selector: defaults::DATABASE_PASSWORD_SELECTOR.to_string(),
        };
        let key = ctx.instance.database_key();
        let change = ctx
            .collaborators
            .databases
            .ensure_database(&ctx.instance.metadata.key, &key, &request)
            .await?;
        if let Some(outcome) = ctx.request_outcome(change, "MariaDBDatabase", &key) {
            return Ok(outcome);
        }

        if let Probe::Ready(database) = &ctx.facts.database {
            ctx.status.database_hostname = database.hostname.clone();
        }
        Ok(StageOutcome::from_probe(
            &ctx.facts.database,
            "DB create completed",
        ))
    }
}

/// Schema migration job, run once per configuration hash
#[derive(Debug, Clone, Copy)]
pub struct DbSyncStage;

#[async_trait]
impl Stage for DbSyncStage {
    fn id(&self) -> ConditionType {
        ConditionType::DbSyncReady
    }

    fn depends_on(&self) -> Vec<ConditionType> {
        vec![ConditionType::DbReady]
    }

    async fn evaluate(&self, ctx: &mut PassContext) -> ReconcileResult<StageOutcome> {
        let config_hash = ctx.applied_config_hash(self.id())?;
        if ctx.status.hash.get(hash_keys::DB_SYNC) == Some(&config_hash) {
            return Ok(StageOutcome::ready("DBsync completed"));
        }

        let artifact = DbSyncJobArtifact {
            key: ctx.instance.db_sync_job_key(),
            spec: DbSyncJobSpec {
                container_image: ctx
                    .instance
                    .spec
                    .heat_api
                    .container_image
                    .clone()
                    .unwrap_or_else(|| ctx.images.api_image.clone()),
                command: vec![
                    "/bin/bash".to_string(),
                    "-c".to_string(),
                    "heat-manage --config-dir /etc/heat/heat.conf.d db_sync".to_string(),
                ],
                config_map: ctx.instance.config_data_key().name,
                config_hash: config_hash.clone(),
            },
        };
        let state = ctx
            .applier
            .ensure(&ctx.instance.metadata.key, &artifact)
            .await?;
        ctx.record(state.action);

        if state.ready {
            ctx.status
                .hash
                .insert(hash_keys::DB_SYNC.to_string(), config_hash);
            return Ok(StageOutcome::ready("DBsync completed"));
        }

        let job: JobStatus = state.object.status_as()?;
        if job.is_failed() {
            let message = if job.message.is_empty() {
                format!("DBsync job {} failed", artifact.key)
            } else {
                job.message
            };
            return Ok(StageOutcome::not_ready(reasons::ERROR, message));
        }
        Ok(StageOutcome::not_ready(
            reasons::REQUESTED,
            "DBsync job still running",
        ))
    }
}

/// Stack user domain registered with the identity service
#[derive(Debug, Clone, Copy)]
pub struct StackDomainStage;

#[async_trait]
impl Stage for StackDomainStage {
    fn id(&self) -> ConditionType {
        ConditionType::StackDomainReady
    }

    fn depends_on(&self) -> Vec<ConditionType> {
        vec![ConditionType::DbSyncReady]
    }

    async fn evaluate(&self, ctx: &mut PassContext) -> ReconcileResult<StageOutcome> {
        if let Some(reason) = ctx.facts.identity.reason() {
            return Ok(StageOutcome::not_ready(reasons::REQUESTED, reason));
        }

        let registration = StackDomainRegistration {
            domain_name: defaults::STACK_DOMAIN_NAME.to_string(),
            admin_user: defaults::STACK_DOMAIN_ADMIN.to_string(),
            service_user: ctx.instance.spec.service_user.clone(),
        };
        ctx.collaborators
            .identity
            .register_stack_domain(&ctx.instance.metadata.key, &registration)
            .await?;
        Ok(StageOutcome::ready("Stack domain registered"))
    }
}

/// Deployment of one sub-component
#[derive(Debug, Clone, Copy)]
pub struct WorkloadStage {
    pub component: SubComponent,
}

#[async_trait]
impl Stage for WorkloadStage {
    fn id(&self) -> ConditionType {
        self.component.condition()
    }

    fn depends_on(&self) -> Vec<ConditionType> {
        vec![ConditionType::StackDomainReady]
    }

    async fn evaluate(&self, ctx: &mut PassContext) -> ReconcileResult<StageOutcome> {
        let component = self.component;
        let overrides = ctx.instance.spec.component(component);
        if !overrides.is_enabled() {
            let key = ctx.instance.workload_key(component);
            if ctx.applier.delete(ObjectKind::Deployment, &key).await? {
                ctx.writes += 1;
            }
            ctx.status.set_ready_count(component, 0);
            return Ok(StageOutcome::disabled(format!("{component} disabled")));
        }

        let config_hash = ctx.applied_config_hash(self.id())?;
        let artifact =
            WorkloadArtifact::render(&ctx.instance, component, &config_hash, &ctx.images);
        let state = ctx
            .applier
            .ensure(&ctx.instance.metadata.key, &artifact)
            .await?;
        ctx.record(state.action);

        let ready = artifact.ready_replicas(&state.object);
        let desired = artifact.spec.replicas;
        ctx.status.set_ready_count(component, ready);

        if state.ready {
            Ok(StageOutcome::ready("Deployment completed"))
        } else {
            Ok(StageOutcome::not_ready(
                reasons::REQUESTED,
                format!("Deployment in progress: {ready}/{desired} replicas ready"),
            ))
        }
    }
}
