//! # Sub-component Workloads
//!
//! Renders the `<name>-api`, `<name>-cfnapi` and `<name>-engine` deployments.
//! A workload only carries what convergence needs: replica count, image,
//! resources, the configuration hash it was rendered against and the volumes
//! that expose the rendered configuration to the container.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::DefaultsConfig;
use crate::constants::{annotations, volumes};
use crate::error::{ReconcileResult, StoreError};
use crate::models::{HeatInstance, ObjectKey, ObjectKind, ResourceRequirements, StoredObject, SubComponent};
use crate::orchestration::artifacts::OwnedArtifact;
use crate::orchestration::config_synthesizer::kolla_config_name;

const CONFIG_DEFAULT_PATH: &str = "/var/lib/config-data/default";
const CONFIG_MERGED_PATH: &str = "/var/lib/config-data/merged";
const CONFIG_CUSTOM_PATH: &str = "/var/lib/config-data/custom";
const KOLLA_CONFIG_PATH: &str = "/var/lib/kolla/config_files/config.json";
const CONFIG_MODE: i32 = 0o640;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum VolumeSource {
    ConfigMap { name: String, default_mode: i32 },
    EmptyDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    pub read_only: bool,
}

impl VolumeMount {
    fn read_only(name: &str, mount_path: &str) -> Self {
        Self {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            sub_path: None,
            read_only: true,
        }
    }
}

/// Desired state of one tier's deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub component: SubComponent,
    pub replicas: i32,
    pub container_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Configuration hash the pods must run with; a new hash rolls the tier
    pub config_hash: String,
    pub volumes: Vec<Volume>,
    pub init_volume_mounts: Vec<VolumeMount>,
    pub volume_mounts: Vec<VolumeMount>,
}

/// Status reported by whatever runs a deployment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    /// Configuration hash of the pods counted in `ready_replicas`
    #[serde(default)]
    pub config_hash: Option<String>,
}

/// Volumes shared by every tier plus the tier's custom configuration
pub fn workload_volumes(config_map: &str) -> Vec<Volume> {
    vec![
        Volume {
            name: volumes::CONFIG_DATA.to_string(),
            source: VolumeSource::ConfigMap {
                name: config_map.to_string(),
                default_mode: CONFIG_MODE,
            },
        },
        Volume {
            name: volumes::CONFIG_DATA_MERGED.to_string(),
            source: VolumeSource::EmptyDir,
        },
        Volume {
            name: volumes::CONFIG_DATA_CUSTOM.to_string(),
            source: VolumeSource::ConfigMap {
                name: config_map.to_string(),
                default_mode: CONFIG_MODE,
            },
        },
    ]
}

/// Mounts for the init step that merges default and custom configuration
pub fn init_volume_mounts() -> Vec<VolumeMount> {
    vec![
        VolumeMount::read_only(volumes::CONFIG_DATA, CONFIG_DEFAULT_PATH),
        VolumeMount {
            read_only: false,
            ..VolumeMount::read_only(volumes::CONFIG_DATA_MERGED, CONFIG_MERGED_PATH)
        },
        VolumeMount::read_only(volumes::CONFIG_DATA_CUSTOM, CONFIG_CUSTOM_PATH),
    ]
}

/// Mounts for the service container
pub fn volume_mounts(component: SubComponent) -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            read_only: false,
            ..VolumeMount::read_only(volumes::CONFIG_DATA_MERGED, CONFIG_MERGED_PATH)
        },
        VolumeMount {
            sub_path: Some(kolla_config_name(component)),
            ..VolumeMount::read_only(volumes::CONFIG_DATA_MERGED, KOLLA_CONFIG_PATH)
        },
    ]
}

/// The deployment for one tier
#[derive(Debug, Clone)]
pub struct WorkloadArtifact {
    pub key: ObjectKey,
    pub spec: WorkloadSpec,
}

impl WorkloadArtifact {
    /// Render the workload for `component`, rendered against `config_hash`
    pub fn render(
        instance: &HeatInstance,
        component: SubComponent,
        config_hash: &str,
        images: &DefaultsConfig,
    ) -> Self {
        let overrides = instance.spec.component(component);
        let default_image = match component {
            SubComponent::Api => &images.api_image,
            SubComponent::CfnApi => &images.cfnapi_image,
            SubComponent::Engine => &images.engine_image,
        };
        let config_map = instance.config_data_key().name;

        Self {
            key: instance.workload_key(component),
            spec: WorkloadSpec {
                component,
                replicas: overrides.desired_replicas(),
                container_image: overrides
                    .container_image
                    .clone()
                    .unwrap_or_else(|| default_image.clone()),
                resources: overrides.resources.clone(),
                node_selector: overrides.node_selector.clone(),
                config_hash: config_hash.to_string(),
                volumes: workload_volumes(&config_map),
                init_volume_mounts: init_volume_mounts(),
                volume_mounts: volume_mounts(component),
            },
        }
    }

    /// Ready replicas counted against the current configuration hash
    pub fn ready_replicas(&self, object: &StoredObject) -> i32 {
        let Ok(status) = object.status_as::<WorkloadStatus>() else {
            return 0;
        };
        match &status.config_hash {
            Some(hash) if hash != &self.spec.config_hash => 0,
            _ => status.ready_replicas,
        }
    }
}

impl OwnedArtifact for WorkloadArtifact {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Deployment
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

    fn is_ready(&self, object: &StoredObject) -> bool {
        self.ready_replicas(object) == self.spec.replicas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HeatSpec, HeatStatus, ObjectMeta, SubComponentSpec};
    use serde_json::json;

    fn instance() -> HeatInstance {
        let mut spec = HeatSpec::new("openstack");
        spec.heat_engine = SubComponentSpec {
            replicas: Some(2),
            container_image: Some("example.com/heat-engine:test".to_string()),
            ..SubComponentSpec::default()
        };
        HeatInstance {
            metadata: ObjectMeta::new(ObjectKey::new("openstack", "heat")),
            spec,
            status: HeatStatus::default(),
        }
    }

    #[test]
    fn test_render_uses_overrides_and_defaults() {
        let images = DefaultsConfig::default();
        let engine = WorkloadArtifact::render(&instance(), SubComponent::Engine, "h1", &images);
        assert_eq!(engine.key.name, "heat-engine");
        assert_eq!(engine.spec.replicas, 2);
        assert_eq!(engine.spec.container_image, "example.com/heat-engine:test");
        assert_eq!(engine.spec.config_hash, "h1");

        let api = WorkloadArtifact::render(&instance(), SubComponent::Api, "h1", &images);
        assert_eq!(api.spec.replicas, 1);
        assert_eq!(api.spec.container_image, images.api_image);
    }

    #[test]
    fn test_cfnapi_mounts_its_kolla_config() {
        let mounts = volume_mounts(SubComponent::CfnApi);
        let kolla = mounts
            .iter()
            .find(|m| m.mount_path == KOLLA_CONFIG_PATH)
            .unwrap();
        assert_eq!(kolla.name, "config-data-merged");
        assert_eq!(kolla.sub_path.as_deref(), Some("heat-cfnapi-config.json"));
        assert!(kolla.read_only);

        let custom = init_volume_mounts()
            .into_iter()
            .find(|m| m.name == "config-data-custom")
            .unwrap();
        assert_eq!(custom.mount_path, "/var/lib/config-data/custom");

        let volumes = workload_volumes("heat-config-data");
        assert!(volumes.iter().any(|v| v.name == "config-data-custom"
            && v.source
                == VolumeSource::ConfigMap {
                    name: "heat-config-data".to_string(),
                    default_mode: 0o640,
                }));
    }

    #[test]
    fn test_ready_replicas_ignore_stale_pods() {
        let images = DefaultsConfig::default();
        let api = WorkloadArtifact::render(&instance(), SubComponent::Api, "new", &images);
        let mut object = StoredObject::new(
            ObjectKind::Deployment,
            ObjectMeta::new(api.key.clone()),
            json!({}),
        );

        object.status = json!({"readyReplicas": 1, "configHash": "old"});
        assert_eq!(api.ready_replicas(&object), 0);
        assert!(!api.is_ready(&object));

        object.status = json!({"readyReplicas": 1, "configHash": "new"});
        assert!(api.is_ready(&object));

        // a runner that does not report the hash is taken at its word
        object.status = json!({"readyReplicas": 1});
        assert!(api.is_ready(&object));
    }
}
