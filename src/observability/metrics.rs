//! # Metrics Collection
//!
//! Prometheus metrics for the reconciliation loop and the certificate store.

use crate::config::ObservabilityConfig;
use crate::errors::{ControllerError, Result};
use ::tracing::{info, warn};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Resources whose changes are counted
pub const CHANGE_RESOURCES: &[&str] = &["stack", "endpoint", "target"];

/// Metrics recorder that tracks controller metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record one applied change, e.g. `("stack", "create")`
    pub fn record_change(&self, resource: &str, operation: &str) {
        let labels = [("resource", resource.to_string()), ("operation", operation.to_string())];
        counter!("albkeeper_changes_total", &labels).increment(1);
    }

    /// Record a problem collected during a pass
    pub fn record_problem(&self, kind: &str) {
        let labels = [("kind", kind.to_string())];
        counter!("albkeeper_pass_problems_total", &labels).increment(1);
    }

    /// Record a finished pass
    pub fn record_pass(&self, duration: f64, problems: usize) {
        histogram!("albkeeper_pass_duration_seconds").record(duration);

        let outcome = if problems == 0 { "success" } else { "problems" };
        counter!("albkeeper_passes_total", "outcome" => outcome).increment(1);
    }

    /// Record a pass aborted by a runtime fault
    pub fn record_pass_fault(&self) {
        counter!("albkeeper_passes_total", "outcome" => "fault").increment(1);
    }

    pub fn set_consecutive_failed_passes(&self, count: u32) {
        gauge!("albkeeper_consecutive_failed_passes").set(count as f64);
    }

    pub fn set_certificates_cached(&self, count: usize) {
        gauge!("albkeeper_certificates_cached").set(count as f64);
    }

    pub fn record_certificate_refresh(&self, success: bool) {
        let outcome = if success { "success" } else { "error" };
        counter!("albkeeper_certificate_refresh_total", "outcome" => outcome).increment(1);
    }

    /// Register controller metrics so Prometheus exports appear before events occur.
    pub fn register_controller_metrics(&self) {
        describe_counter!(
            "albkeeper_changes_total",
            Unit::Count,
            "Changes applied to stacks, endpoint statuses and targets"
        );
        describe_counter!(
            "albkeeper_pass_problems_total",
            Unit::Count,
            "Problems collected during reconciliation passes, by error kind"
        );
        describe_histogram!(
            "albkeeper_pass_duration_seconds",
            Unit::Seconds,
            "Duration of one reconciliation pass"
        );
        describe_counter!("albkeeper_passes_total", Unit::Count, "Reconciliation passes by outcome");
        describe_gauge!(
            "albkeeper_consecutive_failed_passes",
            Unit::Count,
            "Passes in a row that reported at least one problem"
        );
        describe_gauge!(
            "albkeeper_certificates_cached",
            Unit::Count,
            "Certificates in the current certificate snapshot"
        );
        describe_counter!(
            "albkeeper_certificate_refresh_total",
            Unit::Count,
            "Certificate store refreshes by outcome"
        );

        for outcome in ["success", "problems", "fault"] {
            counter!("albkeeper_passes_total", "outcome" => outcome).absolute(0);
        }
        for outcome in ["success", "error"] {
            counter!("albkeeper_certificate_refresh_total", "outcome" => outcome).absolute(0);
        }
        gauge!("albkeeper_consecutive_failed_passes").set(0.0);
        gauge!("albkeeper_certificates_cached").set(0.0);
    }
}

/// Global metrics recorder instance
static METRICS: once_cell::sync::Lazy<Arc<RwLock<Option<MetricsRecorder>>>> =
    once_cell::sync::Lazy::new(|| Arc::new(RwLock::new(None)));

/// Initialize metrics collection and Prometheus exporter
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        ControllerError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            ControllerError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    let recorder = MetricsRecorder::new();
    {
        let mut metrics = METRICS.write().await;
        *metrics = Some(recorder.clone());
    }
    recorder.register_controller_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}

/// Get the global metrics recorder
pub async fn get_metrics() -> Option<MetricsRecorder> {
    METRICS.read().await.clone()
}

/// Record an applied change using the global metrics recorder
pub async fn record_change(resource: &str, operation: &str) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_change(resource, operation);
    }
}

/// Record a pass problem using the global metrics recorder
pub async fn record_problem(kind: &str) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_problem(kind);
    }
}

/// Record a finished pass using the global metrics recorder
pub async fn record_pass(duration: f64, problems: usize) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_pass(duration, problems);
    }
}

/// Record a faulted pass using the global metrics recorder
pub async fn record_pass_fault() {
    if let Some(metrics) = get_metrics().await {
        metrics.record_pass_fault();
    }
}

/// Update the consecutive failure gauge using the global metrics recorder
pub async fn set_consecutive_failed_passes(count: u32) {
    if let Some(metrics) = get_metrics().await {
        metrics.set_consecutive_failed_passes(count);
    }
}

/// Record a certificate refresh using the global metrics recorder
pub async fn record_certificate_refresh(success: bool, cached: usize) {
    if let Some(metrics) = get_metrics().await {
        metrics.record_certificate_refresh(success);
        if success {
            metrics.set_certificates_cached(cached);
        }
    }
}
