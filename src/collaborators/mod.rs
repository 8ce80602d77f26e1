//! # Collaborators
//!
//! External systems the reconciler depends on but does not own. Each one is a
//! trait seam exposing only what the control loop needs: a readiness signal
//! plus the connection facts that feed the rendered configuration.
//!
//! - [`SecretStore`] - get-by-name for service credentials
//! - [`MessageBusProvisioner`] - transport URL requests against a message-bus cluster
//! - [`DatabaseProvisioner`] - database and user requests against a database server
//! - [`IdentityService`] - identity endpoint availability and stack-domain registration
//!
//! [`store_backed`] implements all four on top of an [`ObjectStore`], which is
//! how the in-memory cluster wires them together.

pub mod store_backed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ReconcileResult;
use crate::models::ObjectKey;
use crate::store::ObjectStore;

pub use store_backed::{StoreDatabases, StoreIdentity, StoreMessageBus, StoreSecrets};

/// What a provisioner reports about a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisionState<T> {
    /// No observation yet: the request is unknown or has not been picked up
    Absent,
    /// Acknowledged but not ready
    Pending(String),
    Ready(T),
    /// The provisioner reported a failure
    Failed(String),
}

impl<T> ProvisionState<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProvisionState::Ready(_))
    }
}

/// What ensuring a request wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestChange {
    Unchanged,
    Created,
    /// The stored request differed from the desired one and was patched
    Updated,
}

impl RequestChange {
    pub fn wrote(&self) -> bool {
        !matches!(self, RequestChange::Unchanged)
    }
}

/// Connection facts published by the message-bus provisioner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportFacts {
    /// Secret holding the transport URL
    pub secret_name: String,
}

/// Connection facts published by the database provisioner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseFacts {
    pub hostname: String,
}

/// Facts about the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityFacts {
    pub public_endpoint: String,
}

/// Transport URL request for one service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportUrlRequest {
    pub rabbitmq_cluster_name: String,
}

/// Database request for one service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseRequest {
    pub database_instance: String,
    pub database_name: String,
    pub database_user: String,
    /// Secret key holding the database password
    pub password_selector: String,
}

/// Stack domain registration sent to the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackDomainRegistration {
    pub domain_name: String,
    pub admin_user: String,
    pub service_user: String,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Secret contents, `None` when the secret does not exist
    async fn get_secret(&self, key: &ObjectKey) -> ReconcileResult<Option<BTreeMap<String, String>>>;
}

#[async_trait]
pub trait MessageBusProvisioner: Send + Sync {
    /// Create the request, or patch it when it no longer matches `request`;
    /// idempotent
    async fn ensure_transport_url(
        &self,
        owner: &ObjectKey,
        key: &ObjectKey,
        request: &TransportUrlRequest,
    ) -> ReconcileResult<RequestChange>;

    async fn transport_url_state(
        &self,
        key: &ObjectKey,
    ) -> ReconcileResult<ProvisionState<TransportFacts>>;

    async fn release_transport_url(&self, key: &ObjectKey) -> ReconcileResult<()>;
}

#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    /// Create the request, or patch it when it no longer matches `request`;
    /// idempotent
    async fn ensure_database(
        &self,
        owner: &ObjectKey,
        key: &ObjectKey,
        request: &DatabaseRequest,
    ) -> ReconcileResult<RequestChange>;

    async fn database_state(&self, key: &ObjectKey)
        -> ReconcileResult<ProvisionState<DatabaseFacts>>;

    async fn release_database(&self, key: &ObjectKey) -> ReconcileResult<()>;
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Availability of the identity service in a namespace
    async fn identity_state(&self, namespace: &str)
        -> ReconcileResult<ProvisionState<IdentityFacts>>;

    /// Register the stack domain for `owner`; calling it again with the same
    /// registration is a no-op
    async fn register_stack_domain(
        &self,
        owner: &ObjectKey,
        registration: &StackDomainRegistration,
    ) -> ReconcileResult<()>;

    async fn deregister_stack_domain(&self, owner: &ObjectKey) -> ReconcileResult<()>;
}

/// Handles to every collaborator a reconcile pass uses
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub message_bus: Arc<dyn MessageBusProvisioner>,
    pub databases: Arc<dyn DatabaseProvisioner>,
    pub identity: Arc<dyn IdentityService>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Wire every collaborator on top of one object store
    pub fn store_backed(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            secrets: Arc::new(StoreSecrets::new(store.clone())),
            message_bus: Arc::new(StoreMessageBus::new(store.clone())),
            databases: Arc::new(StoreDatabases::new(store.clone())),
            identity: Arc::new(StoreIdentity::new(store.clone())),
            store,
        }
    }

    /// Same as [`Collaborators::store_backed`] but with a caller-held identity
    /// service, so tests can inspect registrations
    pub fn with_identity(store: Arc<dyn ObjectStore>, identity: Arc<dyn IdentityService>) -> Self {
        Self {
            identity,
            ..Self::store_backed(store)
        }
    }
}
