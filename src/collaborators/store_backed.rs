//! Collaborators backed by objects in an [`ObjectStore`].
//!
//! Requests are stored as owned objects (`TransportURL`, `MariaDBDatabase`)
//! whose `status` is written by whatever provisions them. A request with no
//! status yet has not been observed by its provisioner and reads as
//! [`ProvisionState::Absent`]. Provisioners stamp the request generation they
//! acted on into `observedGeneration`; a report for an older generation than
//! the stored request reads as pending.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    DatabaseFacts, DatabaseProvisioner, DatabaseRequest, IdentityFacts, IdentityService,
    MessageBusProvisioner, ProvisionState, RequestChange, SecretStore, StackDomainRegistration,
    TransportFacts, TransportUrlRequest,
};
use crate::error::{ReconcileResult, StoreError};
use crate::models::{ObjectKey, ObjectKind, ObjectMeta, StoredObject};
use crate::store::ObjectStore;

/// Status document written by a provisioner onto a request object
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub message: String,
    /// Request generation this report describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_endpoint: Option<String>,
}

impl ReportedStatus {
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            failed: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Self::default()
        }
    }
}

/// Read the reported status of a request and map it onto a [`ProvisionState`]
fn provision_state<T>(
    object: Option<StoredObject>,
    facts: impl FnOnce(&ReportedStatus) -> Option<T>,
) -> ReconcileResult<ProvisionState<T>> {
    let Some(object) = object else {
        return Ok(ProvisionState::Absent);
    };
    if object.status.is_null() {
        return Ok(ProvisionState::Absent);
    }
    let reported: ReportedStatus = object.status_as()?;
    let generation = object.metadata.generation;
    if reported.observed_generation.is_some_and(|observed| observed < generation) {
        return Ok(ProvisionState::Pending(format!(
            "{} {} generation {generation} not observed yet",
            object.kind,
            object.key()
        )));
    }
    if reported.failed {
        return Ok(ProvisionState::Failed(reported.message));
    }
    if !reported.ready {
        let message = if reported.message.is_empty() {
            format!("{} {} not ready", object.kind, object.key())
        } else {
            reported.message
        };
        return Ok(ProvisionState::Pending(message));
    }
    match facts(&reported) {
        Some(facts) => Ok(ProvisionState::Ready(facts)),
        None => Ok(ProvisionState::Pending(format!(
            "{} {} reported ready without connection details",
            object.kind,
            object.key()
        ))),
    }
}

/// Create `desired`, or patch the stored request against its observed
/// resource version when spec or owner drifted
async fn ensure_request(
    store: &dyn ObjectStore,
    desired: StoredObject,
) -> ReconcileResult<RequestChange> {
    let Some(mut stored) = store.get(desired.kind, desired.key()).await? else {
        debug!(kind = %desired.kind, key = %desired.key(), "Creating request");
        return match store.create(desired).await {
            Ok(_) => Ok(RequestChange::Created),
            Err(StoreError::AlreadyExists { .. }) => Ok(RequestChange::Unchanged),
            Err(e) => Err(e.into()),
        };
    };

    if stored.spec == desired.spec && stored.metadata.owner == desired.metadata.owner {
        return Ok(RequestChange::Unchanged);
    }
    info!(
        kind = %desired.kind,
        key = %desired.key(),
        resource_version = stored.metadata.resource_version,
        "Updating request"
    );
    stored.spec = desired.spec;
    stored.metadata.owner = desired.metadata.owner;
    store.update(stored).await?;
    Ok(RequestChange::Updated)
}

async fn delete_if_present(
    store: &dyn ObjectStore,
    kind: ObjectKind,
    key: &ObjectKey,
) -> ReconcileResult<()> {
    match store.delete(kind, key).await {
        Ok(()) | Err(StoreError::NotFound { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Secrets stored as `Secret` objects whose spec is a string map
pub struct StoreSecrets {
    store: Arc<dyn ObjectStore>,
}

impl StoreSecrets {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SecretStore for StoreSecrets {
    async fn get_secret(
        &self,
        key: &ObjectKey,
    ) -> ReconcileResult<Option<BTreeMap<String, String>>> {
        match self.store.get(ObjectKind::Secret, key).await? {
            Some(object) => Ok(Some(object.spec_as()?)),
            None => Ok(None),
        }
    }
}

/// Transport URL requests stored as `TransportURL` objects
pub struct StoreMessageBus {
    store: Arc<dyn ObjectStore>,
}

impl StoreMessageBus {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageBusProvisioner for StoreMessageBus {
    async fn ensure_transport_url(
        &self,
        owner: &ObjectKey,
        key: &ObjectKey,
        request: &TransportUrlRequest,
    ) -> ReconcileResult<RequestChange> {
        let object = StoredObject::from_spec(
            ObjectKind::TransportUrl,
            ObjectMeta::new(key.clone()).owned_by(owner),
            request,
        )?;
        ensure_request(self.store.as_ref(), object).await
    }

    async fn transport_url_state(
        &self,
        key: &ObjectKey,
    ) -> ReconcileResult<ProvisionState<TransportFacts>> {
        let object = self.store.get(ObjectKind::TransportUrl, key).await?;
        provision_state(object, |reported| {
            reported.secret_name.clone().map(|secret_name| TransportFacts { secret_name })
        })
    }

    async fn release_transport_url(&self, key: &ObjectKey) -> ReconcileResult<()> {
        delete_if_present(self.store.as_ref(), ObjectKind::TransportUrl, key).await
    }
}

/// Database requests stored as `MariaDBDatabase` objects
pub struct StoreDatabases {
    store: Arc<dyn ObjectStore>,
}

impl StoreDatabases {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DatabaseProvisioner for StoreDatabases {
    async fn ensure_database(
        &self,
        owner: &ObjectKey,
        key: &ObjectKey,
        request: &DatabaseRequest,
    ) -> ReconcileResult<RequestChange> {
        let object = StoredObject::from_spec(
            ObjectKind::MariaDbDatabase,
            ObjectMeta::new(key.clone()).owned_by(owner),
            request,
        )?;
        ensure_request(self.store.as_ref(), object).await
    }

    async fn database_state(
        &self,
        key: &ObjectKey,
    ) -> ReconcileResult<ProvisionState<DatabaseFacts>> {
        let object = self.store.get(ObjectKind::MariaDbDatabase, key).await?;
        provision_state(object, |reported| {
            reported.hostname.clone().map(|hostname| DatabaseFacts { hostname })
        })
    }

    async fn release_database(&self, key: &ObjectKey) -> ReconcileResult<()> {
        delete_if_present(self.store.as_ref(), ObjectKind::MariaDbDatabase, key).await
    }
}

/// Identity service availability read from `KeystoneAPI` objects; stack domain
/// registrations are held in memory.
pub struct StoreIdentity {
    store: Arc<dyn ObjectStore>,
    registrations: DashMap<ObjectKey, StackDomainRegistration>,
}

impl StoreIdentity {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            registrations: DashMap::new(),
        }
    }

    pub fn registration(&self, owner: &ObjectKey) -> Option<StackDomainRegistration> {
        self.registrations.get(owner).map(|r| r.value().clone())
    }
}

#[async_trait]
impl IdentityService for StoreIdentity {
    async fn identity_state(
        &self,
        namespace: &str,
    ) -> ReconcileResult<ProvisionState<IdentityFacts>> {
        let object = self
            .store
            .list(ObjectKind::KeystoneApi, Some(namespace))
            .await?
            .into_iter()
            .next();
        provision_state(object, |reported| {
            reported
                .public_endpoint
                .clone()
                .map(|public_endpoint| IdentityFacts { public_endpoint })
        })
    }

    async fn register_stack_domain(
        &self,
        owner: &ObjectKey,
        registration: &StackDomainRegistration,
    ) -> ReconcileResult<()> {
        let previous = self.registrations.insert(owner.clone(), registration.clone());
        if previous.as_ref() != Some(registration) {
            info!(
                owner = %owner,
                domain = %registration.domain_name,
                admin_user = %registration.admin_user,
                "Stack domain registered"
            );
        }
        Ok(())
    }

    async fn deregister_stack_domain(&self, owner: &ObjectKey) -> ReconcileResult<()> {
        if self.registrations.remove(owner).is_some() {
            info!(owner = %owner, "Stack domain deregistered");
        }
        Ok(())
    }
}
