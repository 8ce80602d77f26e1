//! # Dependency Probe
//!
//! Queries every external collaborator for readiness and connection facts at
//! the start of a pass. Results are never cached across passes: the
//! collaborators are the ground truth. Sub-queries are independent reads and
//! are issued concurrently; none of them retries. A failed or not-ready query
//! yields an incomplete [`Probe`] for that dependency and the stage that needs
//! it decides what to do.

use futures::join;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::collaborators::{
    Collaborators, DatabaseFacts, IdentityFacts, ProvisionState, TransportFacts,
};
use crate::error::ReconcileResult;
use crate::models::{HeatInstance, ObjectKey};

/// Outcome of one dependency query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Probe<T> {
    Ready(T),
    /// The collaborator knows about the dependency but it is not ready yet
    Pending(String),
    /// The collaborator has produced no observation at all
    Missing(String),
    /// The collaborator reported a failure, or the dependency is malformed
    Failed(String),
}

impl<T> Probe<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Probe::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Probe::Ready(facts) => Some(facts),
            _ => None,
        }
    }

    /// Reason the dependency is incomplete, `None` when ready
    pub fn reason(&self) -> Option<&str> {
        match self {
            Probe::Ready(_) => None,
            Probe::Pending(reason) | Probe::Missing(reason) | Probe::Failed(reason) => {
                Some(reason)
            }
        }
    }

    fn from_state(state: ReconcileResult<ProvisionState<T>>, what: &str) -> Self {
        match state {
            Ok(ProvisionState::Ready(facts)) => Probe::Ready(facts),
            Ok(ProvisionState::Pending(reason)) => Probe::Pending(reason),
            Ok(ProvisionState::Absent) => Probe::Missing(format!("{what} not reported yet")),
            Ok(ProvisionState::Failed(reason)) => Probe::Failed(reason),
            Err(e) => Probe::Pending(format!("{what} query failed: {e}")),
        }
    }
}

/// Facts derived from the service credentials secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretFacts {
    /// SHA-256 over the selected keys and values; the values themselves never leave the probe
    pub fingerprint: String,
}

/// Everything the probe learned in one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyFacts {
    pub secret: Probe<SecretFacts>,
    pub transport: Probe<TransportFacts>,
    pub database: Probe<DatabaseFacts>,
    pub identity: Probe<IdentityFacts>,
}

impl DependencyFacts {
    pub fn is_complete(&self) -> bool {
        self.secret.is_ready()
            && self.transport.is_ready()
            && self.database.is_ready()
            && self.identity.is_ready()
    }
}

/// Side-effect-free readiness queries against the collaborators
#[derive(Debug, Clone)]
pub struct DependencyProbe {
    collaborators: Collaborators,
}

impl DependencyProbe {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    #[instrument(skip(self, instance), fields(instance = %instance.metadata.key))]
    pub async fn probe(&self, instance: &HeatInstance) -> DependencyFacts {
        let key = &instance.metadata.key;
        let transport_key = instance.transport_url_key();
        let database_key = instance.database_key();

        let (secret, transport, database, identity) = join!(
            self.probe_secret(instance),
            self.collaborators
                .message_bus
                .transport_url_state(&transport_key),
            self.collaborators.databases.database_state(&database_key),
            self.collaborators.identity.identity_state(&key.namespace),
        );

        let facts = DependencyFacts {
            secret,
            transport: Probe::from_state(transport, "transport URL"),
            database: Probe::from_state(database, "database"),
            identity: Probe::from_state(identity, "identity service"),
        };

        debug!(
            secret_ready = facts.secret.is_ready(),
            transport_ready = facts.transport.is_ready(),
            database_ready = facts.database.is_ready(),
            identity_ready = facts.identity.is_ready(),
            "Dependency probe complete"
        );
        facts
    }

    async fn probe_secret(&self, instance: &HeatInstance) -> Probe<SecretFacts> {
        let secret_key = ObjectKey::new(
            instance.metadata.key.namespace.clone(),
            instance.spec.secret.clone(),
        );
        let data = match self.collaborators.secrets.get_secret(&secret_key).await {
            Ok(Some(data)) => data,
            Ok(None) => return Probe::Missing(format!("secret {secret_key} not found")),
            Err(e) => return Probe::Pending(format!("secret {secret_key} query failed: {e}")),
        };

        let missing: Vec<&str> = instance
            .spec
            .password_selectors
            .iter()
            .filter(|selector| !data.contains_key(selector.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Probe::Failed(format!(
                "secret {secret_key} is missing keys: {}",
                missing.join(", ")
            ));
        }

        let mut selectors: Vec<&String> = instance.spec.password_selectors.iter().collect();
        selectors.sort();
        selectors.dedup();
        let mut hasher = Sha256::new();
        for selector in selectors {
            hasher.update(selector.as_bytes());
            hasher.update(b"=");
            if let Some(value) = data.get(selector) {
                hasher.update(value.as_bytes());
            }
            hasher.update(b"\n");
        }
        Probe::Ready(SecretFacts {
            fingerprint: format!("{:x}", hasher.finalize()),
        })
    }
}
