//! # Structured Logging Module
//!
//! Environment-aware structured logging for the reconcile loop, plus helpers
//! that emit the standard records for stage transitions and pass outcomes.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::models::{ConditionStatus, ConditionType, ObjectKey};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// `RUST_LOG` wins over the configured level, which wins over the
/// environment default.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment).to_string());
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // try_init: another subscriber (tests, embedding binary) may already be set
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            level = %level,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("HEAT_RECONCILER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log a stage condition that changed value during a pass
pub fn log_stage_transition(
    instance: &ObjectKey,
    stage: ConditionType,
    from: ConditionStatus,
    to: ConditionStatus,
    reason: &str,
    message: &str,
) {
    tracing::info!(
        instance = %instance,
        stage = %stage,
        from = %from,
        to = %to,
        reason = %reason,
        message = %message,
        "🔀 STAGE_TRANSITION"
    );
}

/// Log the end of a reconcile pass
pub fn log_pass_outcome(
    instance: &ObjectKey,
    pass_id: &uuid::Uuid,
    outcome: &str,
    blocking_stage: Option<ConditionType>,
    writes: u64,
) {
    tracing::info!(
        instance = %instance,
        pass_id = %pass_id,
        outcome = %outcome,
        blocking_stage = blocking_stage.map(|s| s.as_str()),
        writes = writes,
        "📋 PASS_OUTCOME"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        "❌ ERROR"
    );
}
