//! # Config Synthesizer
//!
//! Pure rendering of the service configuration from the desired spec and the
//! facts gathered by the dependency probe. The rendered files land in the
//! `<name>-config-data` config map; their content hash drives the change gate
//! and is stamped onto every workload so a configuration change rolls them.
//!
//! Replica counts, images and resources never reach the payload: scaling a
//! tier must not look like a configuration change.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::constants::{defaults, files};
use crate::models::{HeatSpec, SubComponent};
use crate::orchestration::dependency_probe::DependencyFacts;

const CONFIG_MERGED_DIR: &str = "/var/lib/config-data/merged";
const CONFIG_CUSTOM_DIR: &str = "/var/lib/config-data/custom";

/// Rendered configuration files, by file name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigPayload {
    pub files: BTreeMap<String, String>,
}

impl ConfigPayload {
    /// SHA-256 over the canonical (name-sorted) file contents, hex encoded
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, contents) in &self.files {
            hasher.update((name.len() as u64).to_be_bytes());
            hasher.update(name.as_bytes());
            hasher.update((contents.len() as u64).to_be_bytes());
            hasher.update(contents.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }
}

/// Probe facts the rendered configuration depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigInputs {
    pub secret_fingerprint: String,
    pub transport_url_secret: String,
    /// Present once the database provisioner has published a hostname
    pub database_hostname: Option<String>,
}

impl ConfigInputs {
    /// `None` until both the credentials secret and the transport URL are ready
    pub fn from_facts(facts: &DependencyFacts) -> Option<Self> {
        let secret = facts.secret.ready()?;
        let transport = facts.transport.ready()?;
        Some(Self {
            secret_fingerprint: secret.fingerprint.clone(),
            transport_url_secret: transport.secret_name.clone(),
            database_hostname: facts.database.ready().map(|db| db.hostname.clone()),
        })
    }
}

/// Render every configuration file for an instance
pub fn synthesize(spec: &HeatSpec, inputs: &ConfigInputs) -> ConfigPayload {
    let mut rendered = BTreeMap::new();
    rendered.insert(files::HEAT_CONF.to_string(), render_heat_conf(spec, inputs));
    rendered.insert(
        files::CUSTOM_CONF.to_string(),
        spec.custom_service_config.clone(),
    );
    for component in SubComponent::ALL {
        rendered.insert(kolla_config_name(component), render_kolla_config(component));
    }
    for (name, contents) in &spec.default_config_overwrite {
        rendered.insert(name.clone(), contents.clone());
    }
    // last, so an overwrite entry cannot mask a credential rotation
    rendered.insert(
        files::INPUT_FINGERPRINT.to_string(),
        inputs.secret_fingerprint.clone(),
    );
    ConfigPayload { files: rendered }
}

/// File name of the kolla start-up description for a tier
pub fn kolla_config_name(component: SubComponent) -> String {
    format!("{}-config.json", component.service_name())
}

fn render_heat_conf(spec: &HeatSpec, inputs: &ConfigInputs) -> String {
    let mut lines = vec![
        "[DEFAULT]".to_string(),
        format!("stack_domain_admin = {}", defaults::STACK_DOMAIN_ADMIN),
        format!("stack_user_domain_name = {}", defaults::STACK_DOMAIN_NAME),
        format!("# transport_url is read from secret {}", inputs.transport_url_secret),
        String::new(),
        "[keystone_authtoken]".to_string(),
        "auth_type = password".to_string(),
        format!("username = {}", spec.service_user),
        String::new(),
        "[trustee]".to_string(),
        "auth_type = password".to_string(),
        format!("username = {}", spec.service_user),
    ];

    if let Some(hostname) = &inputs.database_hostname {
        lines.push(String::new());
        lines.push("[database]".to_string());
        lines.push(format!(
            "connection = mysql+pymysql://{}@{}/{}?read_default_file=/etc/my.cnf",
            spec.database_user,
            hostname,
            defaults::DATABASE_NAME
        ));
    }

    lines.push(String::new());
    lines.join("\n")
}

fn render_kolla_config(component: SubComponent) -> String {
    let service = component.service_name();
    let document = json!({
        "command": format!("/usr/bin/{service} --config-dir /etc/heat/heat.conf.d"),
        "config_files": [
            {
                "source": format!("{CONFIG_MERGED_DIR}/{}", files::HEAT_CONF),
                "dest": format!("/etc/heat/{}", files::HEAT_CONF),
                "owner": "heat",
                "perm": "0600",
            },
            {
                "source": format!("{CONFIG_CUSTOM_DIR}/{}", files::CUSTOM_CONF),
                "dest": format!("/etc/heat/heat.conf.d/{}", files::CUSTOM_CONF),
                "owner": "heat",
                "perm": "0600",
                "optional": true,
            },
        ],
    });
    format!("{document:#}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubComponentSpec;

    fn inputs() -> ConfigInputs {
        ConfigInputs {
            secret_fingerprint: "f00d".to_string(),
            transport_url_secret: "rabbitmq-transport-url-heat-heat-transport".to_string(),
            database_hostname: None,
        }
    }

    #[test]
    fn test_synthesize_renders_expected_files() {
        let payload = synthesize(&HeatSpec::new("openstack"), &inputs());

        let heat_conf = payload.file(files::HEAT_CONF).unwrap();
        assert!(heat_conf.contains("stack_domain_admin = heat_stack_domain_admin"));
        assert!(heat_conf.contains("username = heat"));
        assert!(!heat_conf.contains("[database]"));
        assert_eq!(payload.file(files::CUSTOM_CONF), Some(""));
        assert_eq!(payload.file(files::INPUT_FINGERPRINT), Some("f00d"));
        assert!(payload.file("heat-cfnapi-config.json").is_some());
        assert!(payload.file("heat-engine-config.json").is_some());
    }

    #[test]
    fn test_database_section_follows_facts() {
        let mut with_db = inputs();
        with_db.database_hostname = Some("openstack.openstack.svc".to_string());
        let payload = synthesize(&HeatSpec::new("openstack"), &with_db);
        let heat_conf = payload.file(files::HEAT_CONF).unwrap();
        assert!(heat_conf.contains("[database]"));
        assert!(heat_conf.contains("heat@openstack.openstack.svc/heat"));

        let without = synthesize(&HeatSpec::new("openstack"), &inputs());
        assert_ne!(payload.content_hash(), without.content_hash());
    }

    #[test]
    fn test_hash_is_deterministic() {
        let spec = HeatSpec::new("openstack");
        let first = synthesize(&spec, &inputs());
        let second = synthesize(&spec.clone(), &inputs());
        assert_eq!(first, second);
        assert_eq!(first.content_hash(), second.content_hash());
        assert_eq!(first.content_hash().len(), 64);
    }

    #[test]
    fn test_rendered_fields_change_hash() {
        let base = HeatSpec::new("openstack");
        let base_hash = synthesize(&base, &inputs()).content_hash();

        let mut custom = base.clone();
        custom.custom_service_config = "[DEFAULT]\ndebug = true\n".to_string();
        assert_ne!(synthesize(&custom, &inputs()).content_hash(), base_hash);

        let mut user = base.clone();
        user.service_user = "orchestration".to_string();
        assert_ne!(synthesize(&user, &inputs()).content_hash(), base_hash);

        let mut rotated = inputs();
        rotated.secret_fingerprint = "beef".to_string();
        assert_ne!(synthesize(&base, &rotated).content_hash(), base_hash);
    }

    #[test]
    fn test_scaling_does_not_change_hash() {
        let base = HeatSpec::new("openstack");
        let mut scaled = base.clone();
        scaled.heat_engine = SubComponentSpec::with_replicas(3);
        scaled.heat_api.container_image = Some("example.com/heat-api:next".to_string());

        assert_eq!(
            synthesize(&base, &inputs()).content_hash(),
            synthesize(&scaled, &inputs()).content_hash()
        );
    }

    #[test]
    fn test_overwrite_cannot_replace_fingerprint() {
        let mut spec = HeatSpec::new("openstack");
        spec.default_config_overwrite
            .insert("policy.yaml".to_string(), "{}".to_string());
        spec.default_config_overwrite
            .insert(files::INPUT_FINGERPRINT.to_string(), "forged".to_string());

        let payload = synthesize(&spec, &inputs());
        assert_eq!(payload.file("policy.yaml"), Some("{}"));
        assert_eq!(payload.file(files::INPUT_FINGERPRINT), Some("f00d"));
    }
}
