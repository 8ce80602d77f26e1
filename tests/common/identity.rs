//! Identity service whose stack-domain registrations can be made to fail.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use heat_reconciler::collaborators::{
    IdentityFacts, IdentityService, ProvisionState, StackDomainRegistration, StoreIdentity,
};
use heat_reconciler::error::{ReconcileError, ReconcileResult};
use heat_reconciler::models::ObjectKey;
use heat_reconciler::store::ObjectStore;

pub struct FlakyIdentity {
    inner: StoreIdentity,
    registration_failure: Mutex<Option<String>>,
}

impl FlakyIdentity {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner: StoreIdentity::new(store),
            registration_failure: Mutex::new(None),
        }
    }

    pub fn registration(&self, owner: &ObjectKey) -> Option<StackDomainRegistration> {
        self.inner.registration(owner)
    }

    /// Make subsequent registrations fail with `reason`, or succeed again with `None`
    pub fn set_registration_failure(&self, reason: Option<String>) {
        *self.registration_failure.lock() = reason;
    }
}

#[async_trait]
impl IdentityService for FlakyIdentity {
    async fn identity_state(
        &self,
        namespace: &str,
    ) -> ReconcileResult<ProvisionState<IdentityFacts>> {
        self.inner.identity_state(namespace).await
    }

    async fn register_stack_domain(
        &self,
        owner: &ObjectKey,
        registration: &StackDomainRegistration,
    ) -> ReconcileResult<()> {
        let failure = self.registration_failure.lock().clone();
        if let Some(reason) = failure {
            return Err(ReconcileError::collaborator("identity service", reason));
        }
        self.inner.register_stack_domain(owner, registration).await
    }

    async fn deregister_stack_domain(&self, owner: &ObjectKey) -> ReconcileResult<()> {
        self.inner.deregister_stack_domain(owner).await
    }
}
