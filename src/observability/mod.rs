//! # Observability Infrastructure
//!
//! Structured logging and Prometheus metrics for the controller.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::{init_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging, then metrics if enabled
pub async fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config)?;

    if config.enable_metrics {
        init_metrics(config).await?;
    }

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_enabled = %config.enable_metrics,
        "Observability initialized successfully"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // init_observability installs the global subscriber; only the metrics half runs here
    #[tokio::test]
    async fn test_disabled_metrics_install_no_recorder() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };

        init_metrics(&config).await.unwrap();
        assert!(crate::observability::metrics::get_metrics().await.is_none());
    }
}
