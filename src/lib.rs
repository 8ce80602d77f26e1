#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, MariaDB in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Heat Reconciler
//!
//! Staged, idempotent reconciliation loop that drives a declared `Heat`
//! deployment (API, CloudFormation API and engine) to its running state.
//!
//! ## Overview
//!
//! A `Heat` instance declares what should run. Each reconcile pass compares
//! that declaration with what the collaborators report: credentials secret,
//! message-bus transport URL, database, identity service and the workloads it
//! owns. It then takes the next safe step, records one condition per stage
//! and returns. Passes are repeated on watch events and timed requeues until
//! every condition is True.
//!
//! ## Guarantees
//!
//! - A pass with unchanged inputs performs no writes
//! - Rendered configuration is only applied when its content hash changes
//! - At most one pass per instance runs at a time
//! - Every owned artifact is removed before the finalizer is released
//!
//! ## Module Organization
//!
//! - [`models`] - instance spec/status, conditions and the untyped store envelope
//! - [`store`] - object store contract with an in-memory implementation
//! - [`collaborators`] - secret store, message bus, database and identity seams
//! - [`orchestration`] - probe, synthesizer, stages, sequencer, reconciler and controller
//! - [`config`] - layered configuration
//! - [`logging`] - structured logging setup and standard records
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use heat_reconciler::collaborators::Collaborators;
//! use heat_reconciler::config::ReconcilerConfig;
//! use heat_reconciler::models::ObjectKey;
//! use heat_reconciler::orchestration::HeatReconciler;
//! use heat_reconciler::store::InMemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStore::new());
//! let reconciler =
//!     HeatReconciler::new(Collaborators::store_backed(store), &ReconcilerConfig::default())?;
//!
//! let report = reconciler.reconcile(&ObjectKey::new("openstack", "heat")).await?;
//! println!("{} -> {:?}", report.outcome, report.requeue);
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod store;

pub use config::{ConfigManager, ReconcilerConfig, SequencingMode};
pub use error::{ReconcileError, ReconcileResult, StoreError, StoreResult};
pub use models::{
    Condition, ConditionSet, ConditionStatus, ConditionType, HeatInstance, HeatSpec, HeatStatus,
    ObjectKey, ObjectKind, StoredObject, SubComponent,
};
pub use orchestration::{Controller, HeatReconciler, PassOutcome, PassReport, RequeueDecision};
pub use store::{InMemoryStore, ObjectStore};
