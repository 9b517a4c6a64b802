//! # Structured Logging
//!
//! Subscriber setup and span macros for the reconciliation loop.
//!
//! Every pass runs inside a `reconciliation_pass` span carrying a fresh
//! `pass_id`, so all log lines of one pass can be grouped. Stack operations
//! nest a `stack_operation` span naming the stack.

use crate::config::ObservabilityConfig;
use crate::errors::{ControllerError, Result};
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for one reconciliation pass.
#[macro_export]
macro_rules! pass_span {
    ($cluster_id:expr) => {
        tracing::info_span!(
            "reconciliation_pass",
            cluster_id = %$cluster_id,
            pass_id = %uuid::Uuid::new_v4()
        )
    };
    ($cluster_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "reconciliation_pass",
            cluster_id = %$cluster_id,
            pass_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for an operation on one stack.
#[macro_export]
macro_rules! stack_span {
    ($operation:expr, $stack:expr) => {
        tracing::info_span!("stack_operation", operation = %$operation, stack = %$stack)
    };
    ($operation:expr, $stack:expr, $($field:tt)*) => {
        tracing::info_span!(
            "stack_operation",
            operation = %$operation,
            stack = %$stack,
            $($field)*
        )
    };
}

/// Build the subscriber described by `config`: `RUST_LOG` wins over the
/// configured level.
pub fn build_subscriber(config: &ObservabilityConfig) -> Box<dyn Subscriber + Send + Sync> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_logging {
        Box::new(
            registry.with(fmt::layer().json().with_current_span(true).with_span_list(false).with_target(true)),
        )
    } else {
        Box::new(registry.with(fmt::layer().with_target(true)))
    }
}

/// Install the global subscriber
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    tracing::subscriber::set_global_default(build_subscriber(config))
        .map_err(|e| ControllerError::config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        cluster_id = %config.controller.cluster_id,
        polling_interval_seconds = config.controller.polling_interval_seconds,
        max_certs_per_load_balancer = config.controller.max_certs_per_load_balancer,
        deletion_grace_period_seconds = config.controller.deletion_grace_period_seconds,
        min_load_balancer_age_seconds = config.controller.min_load_balancer_age_seconds,
        default_ssl_policy = %config.controller.default_ssl_policy,
        dry_run = config.controller.dry_run,
        certificate_sources = config.certificates.source_count(),
        metrics_enabled = %config.observability.enable_metrics,
        "albkeeper controller configuration"
    );
}
