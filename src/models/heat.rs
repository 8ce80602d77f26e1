//! # Heat Instance Model
//!
//! Desired state ([`HeatSpec`]), reconciler-owned observed state
//! ([`HeatStatus`]) and the typed view of a stored `Heat` object.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{defaults, hash_keys, suffixes};
use crate::error::StoreResult;
use crate::models::condition::{ConditionSet, ConditionType};
use crate::models::object::{ObjectKey, ObjectKind, ObjectMeta, StoredObject};

/// Compute resource requests and limits passed through to a workload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// Per sub-component overrides
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubComponentSpec {
    /// Desired replicas; `None` resolves to the default of 1, `<= 0` disables the tier
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

impl SubComponentSpec {
    pub fn with_replicas(replicas: i32) -> Self {
        Self {
            replicas: Some(replicas),
            ..Self::default()
        }
    }

    /// Resolved replica count; 0 when disabled
    pub fn desired_replicas(&self) -> i32 {
        self.replicas.unwrap_or(defaults::REPLICAS).max(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.desired_replicas() > 0
    }
}

/// The three deployable tiers of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubComponent {
    Api,
    CfnApi,
    Engine,
}

impl SubComponent {
    pub const ALL: [SubComponent; 3] = [Self::Api, Self::CfnApi, Self::Engine];

    /// Suffix used for the workload name, `<instance>-<suffix>`
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::CfnApi => "cfnapi",
            Self::Engine => "engine",
        }
    }

    pub fn condition(&self) -> ConditionType {
        match self {
            Self::Api => ConditionType::ApiReady,
            Self::CfnApi => ConditionType::CfnApiReady,
            Self::Engine => ConditionType::EngineReady,
        }
    }

    /// Service binary name, used in rendered kolla config file names
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Api => "heat-api",
            Self::CfnApi => "heat-cfnapi",
            Self::Engine => "heat-engine",
        }
    }
}

impl fmt::Display for SubComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.service_name())
    }
}

fn default_database_user() -> String {
    defaults::DATABASE_USER.to_string()
}

fn default_rabbitmq_cluster_name() -> String {
    defaults::RABBITMQ_CLUSTER_NAME.to_string()
}

fn default_service_user() -> String {
    defaults::SERVICE_USER.to_string()
}

fn default_secret() -> String {
    defaults::SECRET.to_string()
}

fn default_password_selectors() -> Vec<String> {
    defaults::PASSWORD_SELECTORS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Desired state of a Heat deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatSpec {
    /// Name of the database server instance the service database lives on
    pub database_instance: String,
    #[serde(default = "default_database_user")]
    pub database_user: String,
    #[serde(default = "default_rabbitmq_cluster_name")]
    pub rabbitmq_cluster_name: String,
    #[serde(default = "default_service_user")]
    pub service_user: String,
    /// Secret holding the service passwords
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Keys that must be present in the secret
    #[serde(default = "default_password_selectors")]
    pub password_selectors: Vec<String>,
    /// Free-form configuration appended as `custom.conf`
    #[serde(default)]
    pub custom_service_config: String,
    /// Extra rendered files, by file name
    #[serde(default)]
    pub default_config_overwrite: BTreeMap<String, String>,
    #[serde(default)]
    pub heat_api: SubComponentSpec,
    #[serde(default)]
    pub heat_cfnapi: SubComponentSpec,
    #[serde(default)]
    pub heat_engine: SubComponentSpec,
}

impl HeatSpec {
    pub fn new(database_instance: impl Into<String>) -> Self {
        Self {
            database_instance: database_instance.into(),
            database_user: default_database_user(),
            rabbitmq_cluster_name: default_rabbitmq_cluster_name(),
            service_user: default_service_user(),
            secret: default_secret(),
            password_selectors: default_password_selectors(),
            custom_service_config: String::new(),
            default_config_overwrite: BTreeMap::new(),
            heat_api: SubComponentSpec::default(),
            heat_cfnapi: SubComponentSpec::default(),
            heat_engine: SubComponentSpec::default(),
        }
    }

    pub fn component(&self, component: SubComponent) -> &SubComponentSpec {
        match component {
            SubComponent::Api => &self.heat_api,
            SubComponent::CfnApi => &self.heat_cfnapi,
            SubComponent::Engine => &self.heat_engine,
        }
    }

    pub fn component_mut(&mut self, component: SubComponent) -> &mut SubComponentSpec {
        match component {
            SubComponent::Api => &mut self.heat_api,
            SubComponent::CfnApi => &mut self.heat_cfnapi,
            SubComponent::Engine => &mut self.heat_engine,
        }
    }

    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.database_instance.trim().is_empty() {
            missing.push("databaseInstance");
        }
        if self.database_user.trim().is_empty() {
            missing.push("databaseUser");
        }
        if self.rabbitmq_cluster_name.trim().is_empty() {
            missing.push("rabbitmqClusterName");
        }
        if self.service_user.trim().is_empty() {
            missing.push("serviceUser");
        }
        if self.secret.trim().is_empty() {
            missing.push("secret");
        }
        missing
    }
}

/// Observed state, written only by the reconciler
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatStatus {
    /// Content hashes by purpose (`input`, `dbsync`)
    #[serde(default)]
    pub hash: BTreeMap<String, String>,
    #[serde(default)]
    pub database_hostname: String,
    #[serde(default)]
    pub transport_url_secret: String,
    #[serde(default)]
    pub api_ready_count: i32,
    #[serde(default)]
    pub cfnapi_ready_count: i32,
    #[serde(default)]
    pub engine_ready_count: i32,
    #[serde(default)]
    pub conditions: ConditionSet,
    #[serde(default)]
    pub observed_generation: u64,
}

impl HeatStatus {
    /// Hash of the last applied service configuration
    pub fn config_hash(&self) -> Option<&str> {
        self.hash.get(hash_keys::INPUT).map(String::as_str)
    }

    pub fn ready_count(&self, component: SubComponent) -> i32 {
        match component {
            SubComponent::Api => self.api_ready_count,
            SubComponent::CfnApi => self.cfnapi_ready_count,
            SubComponent::Engine => self.engine_ready_count,
        }
    }

    pub fn set_ready_count(&mut self, component: SubComponent, count: i32) {
        match component {
            SubComponent::Api => self.api_ready_count = count,
            SubComponent::CfnApi => self.cfnapi_ready_count = count,
            SubComponent::Engine => self.engine_ready_count = count,
        }
    }
}

/// Key of the transport URL request owned by `instance`
pub fn transport_url_key(instance: &ObjectKey) -> ObjectKey {
    instance.with_suffix(suffixes::TRANSPORT_URL)
}

/// The database request shares the instance name
pub fn database_key(instance: &ObjectKey) -> ObjectKey {
    instance.clone()
}

/// Typed view of a stored `Heat` object
#[derive(Debug, Clone, PartialEq)]
pub struct HeatInstance {
    pub metadata: ObjectMeta,
    pub spec: HeatSpec,
    pub status: HeatStatus,
}

impl HeatInstance {
    pub fn from_object(object: &StoredObject) -> StoreResult<Self> {
        Ok(Self {
            metadata: object.metadata.clone(),
            spec: object.spec_as()?,
            status: object.status_as()?,
        })
    }

    pub fn to_object(&self) -> StoreResult<StoredObject> {
        let mut object =
            StoredObject::from_spec(ObjectKind::Heat, self.metadata.clone(), &self.spec)?;
        object.status = serde_json::to_value(&self.status)?;
        Ok(object)
    }

    pub fn name(&self) -> &str {
        &self.metadata.key.name
    }

    pub fn transport_url_key(&self) -> ObjectKey {
        transport_url_key(&self.metadata.key)
    }

    pub fn database_key(&self) -> ObjectKey {
        database_key(&self.metadata.key)
    }

    pub fn config_data_key(&self) -> ObjectKey {
        self.metadata.key.with_suffix(suffixes::CONFIG_DATA)
    }

    pub fn db_sync_job_key(&self) -> ObjectKey {
        self.metadata.key.with_suffix(suffixes::DB_SYNC)
    }

    pub fn workload_key(&self, component: SubComponent) -> ObjectKey {
        self.metadata.key.with_suffix(component.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_defaults_from_minimal_document() {
        let spec: HeatSpec = serde_json::from_value(json!({
            "databaseInstance": "openstack",
        }))
        .unwrap();

        assert_eq!(spec.database_instance, "openstack");
        assert_eq!(spec.database_user, "heat");
        assert_eq!(spec.rabbitmq_cluster_name, "rabbitmq");
        assert_eq!(spec.service_user, "heat");
        assert_eq!(spec.heat_api.desired_replicas(), 1);
        assert_eq!(spec.heat_cfnapi.desired_replicas(), 1);
        assert_eq!(spec.heat_engine.desired_replicas(), 1);
    }

    #[test]
    fn test_non_positive_replicas_disable_component() {
        assert!(!SubComponentSpec::with_replicas(0).is_enabled());
        assert!(!SubComponentSpec::with_replicas(-2).is_enabled());
        assert_eq!(SubComponentSpec::with_replicas(-2).desired_replicas(), 0);
        assert!(SubComponentSpec::with_replicas(3).is_enabled());
    }

    #[test]
    fn test_missing_fields() {
        let mut spec = HeatSpec::new("");
        spec.service_user = " ".to_string();
        assert_eq!(spec.missing_fields(), vec!["databaseInstance", "serviceUser"]);
        assert!(HeatSpec::new("openstack").missing_fields().is_empty());
    }

    #[test]
    fn test_fresh_status_is_empty() {
        let status = HeatStatus::default();
        assert!(status.config_hash().is_none());
        assert_eq!(status.database_hostname, "");
        assert_eq!(status.transport_url_secret, "");
        for component in SubComponent::ALL {
            assert_eq!(status.ready_count(component), 0);
        }
    }

    #[test]
    fn test_artifact_keys() {
        let instance = HeatInstance {
            metadata: ObjectMeta::new(ObjectKey::new("openstack", "heat")),
            spec: HeatSpec::new("openstack"),
            status: HeatStatus::default(),
        };
        assert_eq!(instance.transport_url_key().name, "heat-heat-transport");
        assert_eq!(instance.config_data_key().name, "heat-config-data");
        assert_eq!(instance.db_sync_job_key().name, "heat-db-sync");
        assert_eq!(instance.workload_key(SubComponent::CfnApi).name, "heat-cfnapi");
        assert_eq!(instance.database_key(), instance.metadata.key);
    }
}
