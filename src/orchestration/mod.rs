//! # Orchestration
//!
//! The reconcile pass and the work queue that drives it.
//!
//! ## Pass structure
//!
//! Each pass probes the collaborators once, then walks a fixed graph of
//! stages. Every stage owns one condition on the instance status:
//!
//! ```text
//! InputReady ─▶ TransportURLReady ─▶ ServiceConfigReady ─▶ DBReady ─▶ DBSyncReady
//!            ─▶ StackDomainReady ─┬▶ HeatAPIReady
//!                                 ├▶ HeatCfnAPIReady
//!                                 └▶ HeatEngineReady
//! ```
//!
//! ## Core Components
//!
//! - **DependencyProbe**: reads secret, message bus, database and identity readiness
//! - **ConfigSynthesizer**: renders the service configuration and its content hash
//! - **ChangeGate**: decides whether rendered configuration must be applied
//! - **StageSequencer**: evaluates stages in dependency order and records conditions
//! - **Aggregator**: folds stage conditions into `Ready`
//! - **RequeuePolicy**: chooses when the next pass runs
//! - **HeatReconciler**: one pass end to end, including teardown
//! - **Controller**: watch-driven work queue with per-instance serialization

pub mod aggregator;
pub mod artifacts;
pub mod change_gate;
pub mod components;
pub mod config_synthesizer;
pub mod controller;
pub mod dependency_probe;
pub mod error_classifier;
pub mod reconciler;
pub mod requeue;
pub mod sequencer;
pub mod stage_graph;
pub mod stages;

pub use aggregator::{aggregate, blocking_stage, READY_MESSAGE};
pub use artifacts::{ApplyAction, ArtifactApplier, OwnedArtifact, UpdatePolicy};
pub use change_gate::needs_apply;
pub use config_synthesizer::{synthesize, ConfigInputs, ConfigPayload};
pub use controller::{Controller, ControllerStats};
pub use dependency_probe::{DependencyFacts, DependencyProbe, Probe};
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, RetryStrategy, StandardErrorClassifier,
};
pub use reconciler::{HeatReconciler, PassReport};
pub use requeue::{PassOutcome, RequeueDecision, RequeuePolicy};
pub use sequencer::{SequenceReport, StageSequencer};
pub use stage_graph::{StageGraph, StageGraphError};
pub use stages::{heat_stages, PassContext, Stage, StageOutcome};
