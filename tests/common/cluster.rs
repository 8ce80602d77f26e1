//! In-memory cluster used by the integration tests.
//!
//! The reconciler only writes requests and owned artifacts; the `report_*`
//! and `roll_out` helpers play the part of the provisioners and the workload
//! runtime by writing the status those objects would eventually carry.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use heat_reconciler::collaborators::store_backed::ReportedStatus;
use heat_reconciler::collaborators::Collaborators;
use heat_reconciler::config::{ReconcilerConfig, SequencingMode};
use heat_reconciler::constants::defaults;
use heat_reconciler::models::{
    ConditionStatus, ConditionType, HeatInstance, HeatSpec, ObjectKey, ObjectKind, ObjectMeta,
    StoredObject,
};
use heat_reconciler::orchestration::artifacts::JobStatus;
use heat_reconciler::orchestration::components::{WorkloadSpec, WorkloadStatus};
use heat_reconciler::orchestration::{HeatReconciler, PassOutcome, PassReport};
use heat_reconciler::store::{InMemoryStore, ObjectStore};

use super::identity::FlakyIdentity;

pub const NAMESPACE: &str = "openstack";
pub const TRANSPORT_SECRET: &str = "rabbitmq-transport-url-heat-heat-transport";
pub const DB_HOSTNAME: &str = "openstack.openstack.svc";

pub fn instance_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, "heat")
}

pub fn secret_values(password: &str) -> BTreeMap<String, String> {
    defaults::PASSWORD_SELECTORS
        .iter()
        .map(|selector| (selector.to_string(), format!("{password}-{selector}")))
        .collect()
}

pub struct TestCluster {
    pub store: Arc<InMemoryStore>,
    pub identity: Arc<FlakyIdentity>,
    pub reconciler: Arc<HeatReconciler>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    pub fn with_mode(mode: SequencingMode) -> Self {
        let mut config = ReconcilerConfig::default();
        config.sequencing.mode = mode;
        Self::with_config(config)
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let identity = Arc::new(FlakyIdentity::new(store.clone()));
        let collaborators = Collaborators::with_identity(store.clone(), identity.clone());
        let reconciler = Arc::new(HeatReconciler::new(collaborators, &config).unwrap());
        Self {
            store,
            identity,
            reconciler,
        }
    }

    pub async fn create_instance(&self, spec: HeatSpec) {
        let object = StoredObject::from_spec(
            ObjectKind::Heat,
            ObjectMeta::new(instance_key()),
            &spec,
        )
        .unwrap();
        self.store.create(object).await.unwrap();
    }

    /// Replace the instance spec, as a user edit would
    pub async fn edit_spec(&self, edit: impl FnOnce(&mut HeatSpec)) {
        let mut object = self.heat_object().await;
        let mut spec: HeatSpec = object.spec_as().unwrap();
        edit(&mut spec);
        object.spec = serde_json::to_value(&spec).unwrap();
        self.store.update(object).await.unwrap();
    }

    pub async fn create_secret(&self, values: BTreeMap<String, String>) {
        let object = StoredObject::from_spec(
            ObjectKind::Secret,
            ObjectMeta::new(ObjectKey::new(NAMESPACE, defaults::SECRET)),
            &values,
        )
        .unwrap();
        self.store.create(object).await.unwrap();
    }

    pub async fn rotate_secret(&self, values: BTreeMap<String, String>) {
        let mut object = self
            .store
            .get(ObjectKind::Secret, &ObjectKey::new(NAMESPACE, defaults::SECRET))
            .await
            .unwrap()
            .unwrap();
        object.spec = serde_json::to_value(&values).unwrap();
        self.store.update(object).await.unwrap();
    }

    async fn report(&self, kind: ObjectKind, key: &ObjectKey, status: Value) {
        let mut object = self.store.get(kind, key).await.unwrap().unwrap_or_else(|| {
            panic!("{kind} {key} has not been requested yet");
        });
        object.status = status;
        self.store.update_status(object).await.unwrap();
    }

    /// Report on a request for the generation currently stored
    async fn report_request(&self, kind: ObjectKind, key: &ObjectKey, status: ReportedStatus) {
        let generation = self.object(kind, key).await.map(|o| o.metadata.generation);
        let status = ReportedStatus {
            observed_generation: generation,
            ..status
        };
        self.report(kind, key, serde_json::to_value(status).unwrap())
            .await;
    }

    pub async fn report_transport_ready(&self) {
        let status = ReportedStatus {
            secret_name: Some(TRANSPORT_SECRET.to_string()),
            ..ReportedStatus::ready()
        };
        self.report_request(
            ObjectKind::TransportUrl,
            &instance_key().with_suffix("heat-transport"),
            status,
        )
        .await;
    }

    pub async fn report_database_ready(&self) {
        let status = ReportedStatus {
            hostname: Some(DB_HOSTNAME.to_string()),
            ..ReportedStatus::ready()
        };
        self.report_request(ObjectKind::MariaDbDatabase, &instance_key(), status)
            .await;
    }

    pub async fn report_identity_ready(&self) {
        let key = ObjectKey::new(NAMESPACE, "keystone");
        if self
            .store
            .get(ObjectKind::KeystoneApi, &key)
            .await
            .unwrap()
            .is_none()
        {
            let object = StoredObject::new(ObjectKind::KeystoneApi, ObjectMeta::new(key.clone()), json!({}));
            self.store.create(object).await.unwrap();
        }
        let status = ReportedStatus {
            public_endpoint: Some("http://keystone-public.openstack.svc:5000".to_string()),
            ..ReportedStatus::ready()
        };
        self.report_request(ObjectKind::KeystoneApi, &key, status)
            .await;
    }

    /// Secret plus every collaborator ready
    pub async fn collaborators_ready(&self) {
        self.create_secret(secret_values("12345678")).await;
        self.reconcile().await;
        self.report_transport_ready().await;
        self.report_identity_ready().await;
        self.reconcile().await;
        self.report_database_ready().await;
    }

    /// Mark the db sync job, if any, as finished
    pub async fn complete_db_sync(&self) {
        let key = instance_key().with_suffix("db-sync");
        let Some(mut job) = self.store.get(ObjectKind::Job, &key).await.unwrap() else {
            return;
        };
        let status = JobStatus {
            succeeded: 1,
            ..JobStatus::default()
        };
        let status = serde_json::to_value(status).unwrap();
        if job.status != status {
            job.status = status;
            self.store.update_status(job).await.unwrap();
        }
    }

    pub async fn fail_db_sync(&self, message: &str) {
        let key = instance_key().with_suffix("db-sync");
        let status = JobStatus {
            failed: 1,
            message: message.to_string(),
            ..JobStatus::default()
        };
        self.report(ObjectKind::Job, &key, serde_json::to_value(status).unwrap())
            .await;
    }

    /// Bring every deployment's ready replicas up to its desired count
    pub async fn roll_out(&self) {
        let deployments = self
            .store
            .list(ObjectKind::Deployment, Some(NAMESPACE))
            .await
            .unwrap();
        for mut deployment in deployments {
            let spec: WorkloadSpec = deployment.spec_as().unwrap();
            let status = serde_json::to_value(WorkloadStatus {
                replicas: spec.replicas,
                ready_replicas: spec.replicas,
                config_hash: Some(spec.config_hash.clone()),
            })
            .unwrap();
            if deployment.status != status {
                deployment.status = status;
                self.store.update_status(deployment).await.unwrap();
            }
        }
    }

    /// Answer whatever has been requested so far, as running provisioners would
    pub async fn provision_requested(&self) {
        let transport = instance_key().with_suffix("heat-transport");
        if matches!(self.object(ObjectKind::TransportUrl, &transport).await, Some(o) if o.status.is_null()) {
            self.report_transport_ready().await;
        }
        if matches!(self.object(ObjectKind::MariaDbDatabase, &instance_key()).await, Some(o) if o.status.is_null()) {
            self.report_database_ready().await;
        }
        self.complete_db_sync().await;
        self.roll_out().await;
    }

    pub async fn reconcile(&self) -> PassReport {
        self.reconciler.reconcile(&instance_key()).await.unwrap()
    }

    /// Alternate passes with job completion and rollout until the instance converges
    pub async fn converge(&self) -> PassReport {
        for _ in 0..20 {
            let report = self.reconcile().await;
            if report.outcome == PassOutcome::Converged {
                return report;
            }
            self.complete_db_sync().await;
            self.roll_out().await;
        }
        panic!("instance did not converge: {:?}", self.instance().await.status.conditions);
    }

    pub async fn heat_object(&self) -> StoredObject {
        self.store
            .get(ObjectKind::Heat, &instance_key())
            .await
            .unwrap()
            .expect("heat instance exists")
    }

    pub async fn instance(&self) -> HeatInstance {
        HeatInstance::from_object(&self.heat_object().await).unwrap()
    }

    pub async fn condition(&self, condition: ConditionType) -> (ConditionStatus, String, String) {
        let instance = self.instance().await;
        let found = instance
            .status
            .conditions
            .get(condition)
            .unwrap_or_else(|| panic!("condition {condition} not recorded"));
        (found.status, found.reason.clone(), found.message.clone())
    }

    pub async fn object(&self, kind: ObjectKind, key: &ObjectKey) -> Option<StoredObject> {
        self.store.get(kind, key).await.unwrap()
    }
}
