//! # Reconciler Constants
//!
//! Names, suffixes and defaults that define the externally visible shape of a
//! Heat deployment: artifact names derived from the instance name, the finalizer
//! marker, status hash keys and spec defaults.

/// Finalizer placed on every reconciled `Heat` instance
pub const FINALIZER: &str = "Heat";

/// Suffixes of owned artifacts, `<instance>-<suffix>`
pub mod suffixes {
    pub const CONFIG_DATA: &str = "config-data";
    pub const DB_SYNC: &str = "db-sync";
    pub const TRANSPORT_URL: &str = "heat-transport";
}

/// Keys of `HeatStatus::hash`
pub mod hash_keys {
    /// Hash of the last applied service configuration
    pub const INPUT: &str = "input";
    /// Configuration hash the migration job last succeeded for
    pub const DB_SYNC: &str = "dbsync";
}

/// Annotations written on owned artifacts
pub mod annotations {
    /// Content hash of the artifact's desired spec
    pub const CONTENT_HASH: &str = "heat.openstack.org/content-hash";
    /// Service configuration hash the artifact was rendered against
    pub const CONFIG_HASH: &str = "heat.openstack.org/config-hash";
}

/// Rendered configuration file names
pub mod files {
    pub const HEAT_CONF: &str = "heat.conf";
    pub const CUSTOM_CONF: &str = "custom.conf";
    pub const INPUT_FINGERPRINT: &str = "inputs.fingerprint";
}

/// Spec defaults
pub mod defaults {
    pub const REPLICAS: i32 = 1;
    pub const DATABASE_USER: &str = "heat";
    pub const DATABASE_NAME: &str = "heat";
    pub const RABBITMQ_CLUSTER_NAME: &str = "rabbitmq";
    pub const SERVICE_USER: &str = "heat";
    pub const SECRET: &str = "osp-secret";
    pub const PASSWORD_SELECTORS: [&str; 4] = [
        "HeatPassword",
        "HeatDatabasePassword",
        "HeatAuthEncryptionKey",
        "HeatStackDomainAdminPassword",
    ];
    /// Secret key holding the database password
    pub const DATABASE_PASSWORD_SELECTOR: &str = "HeatDatabasePassword";
    pub const STACK_DOMAIN_ADMIN: &str = "heat_stack_domain_admin";
    pub const STACK_DOMAIN_NAME: &str = "heat_stack";
}

/// Volume names mounted into every tier
pub mod volumes {
    pub const CONFIG_DATA: &str = "config-data";
    pub const CONFIG_DATA_MERGED: &str = "config-data-merged";
    pub const CONFIG_DATA_CUSTOM: &str = "config-data-custom";
}
