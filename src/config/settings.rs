//! # Configuration Settings
//!
//! Defines the configuration structure for the albkeeper controller.

use crate::domain::{CertificateSummary, IpAddressType, LoadBalancerType};
use crate::errors::{ControllerError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Load-balancer SSL policies the provider accepts
pub const SSL_POLICIES: &[&str] = &[
    "ELBSecurityPolicy-2016-08",
    "ELBSecurityPolicy-2015-05",
    "ELBSecurityPolicy-TLS-1-0-2015-04",
    "ELBSecurityPolicy-TLS-1-1-2017-01",
    "ELBSecurityPolicy-TLS-1-2-2017-01",
    "ELBSecurityPolicy-TLS-1-2-Ext-2018-06",
    "ELBSecurityPolicy-FS-2018-06",
    "ELBSecurityPolicy-FS-1-1-2019-08",
    "ELBSecurityPolicy-FS-1-2-2019-08",
    "ELBSecurityPolicy-FS-1-2-Res-2019-08",
    "ELBSecurityPolicy-FS-1-2-Res-2020-10",
    "ELBSecurityPolicy-TLS13-1-2-2021-06",
    "ELBSecurityPolicy-TLS13-1-3-2021-06",
];

pub fn is_known_ssl_policy(policy: &str) -> bool {
    SSL_POLICIES.contains(&policy)
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Reconciliation loop configuration
    #[validate(nested)]
    pub controller: ControllerConfig,

    /// Certificate sources
    #[validate(nested)]
    pub certificates: CertificatesConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(ControllerError::from)?;

        self.validate_custom()?;

        Ok(())
    }

    /// Checks the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.controller.cluster_id.trim().is_empty() {
            return Err(ControllerError::validation_field("Cluster id cannot be blank", "cluster_id"));
        }

        if !is_known_ssl_policy(&self.controller.default_ssl_policy) {
            return Err(ControllerError::validation_field(
                format!("Unknown SSL policy '{}'", self.controller.default_ssl_policy),
                "default_ssl_policy",
            ));
        }

        if let Some(reference) = &self.controller.alarm_config {
            if self.controller.alarm_config_ref().is_none() {
                return Err(ControllerError::validation_field(
                    format!("Alarm config '{}' must be <namespace>/<name>", reference),
                    "alarm_config",
                ));
            }
        }

        Ok(())
    }
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ControllerConfig {
    /// Value of the cluster ownership tag on every managed stack
    #[validate(length(min = 1, message = "Cluster id cannot be empty"))]
    pub cluster_id: String,

    /// Seconds between the end of one pass and the start of the next
    #[validate(range(min = 1, max = 3600, message = "Polling interval must be between 1 and 3600 seconds"))]
    pub polling_interval_seconds: u64,

    /// Seconds between certificate store refreshes
    #[validate(range(min = 1, message = "Certificate refresh interval must be at least 1 second"))]
    pub cert_refresh_interval_seconds: u64,

    /// Listener certificate limit per load balancer
    #[validate(range(min = 1, max = 25, message = "Certificates per load balancer must be between 1 and 25"))]
    pub max_certs_per_load_balancer: usize,

    /// Delay before an unused stack or certificate is removed
    pub deletion_grace_period_seconds: u64,

    /// Minimum stack age before endpoints are pointed at it
    pub min_load_balancer_age_seconds: u64,

    /// SSL policy for endpoints without an explicit one
    #[validate(length(min = 1, message = "Default SSL policy cannot be empty"))]
    pub default_ssl_policy: String,

    pub default_load_balancer_type: LoadBalancerType,

    pub default_ip_address_type: IpAddressType,

    /// Hostnames under this domain never get a certificate
    pub cluster_local_domain: String,

    /// Alarm definitions as `<namespace>/<name>` of a config resource
    pub alarm_config: Option<String>,

    /// Failed passes in a row before every failure is logged as an error
    #[validate(range(min = 1, message = "Max consecutive failures must be at least 1"))]
    pub max_consecutive_failures: u32,

    /// Log decisions without calling mutating collaborator methods
    pub dry_run: bool,

    /// YAML file listing endpoints for the file-backed orchestrator
    pub endpoints_file: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_id: "default".to_string(),
            polling_interval_seconds: 30,
            cert_refresh_interval_seconds: 1800,
            max_certs_per_load_balancer: 25,
            deletion_grace_period_seconds: 3600,
            min_load_balancer_age_seconds: 360,
            default_ssl_policy: "ELBSecurityPolicy-2016-08".to_string(),
            default_load_balancer_type: LoadBalancerType::Application,
            default_ip_address_type: IpAddressType::Ipv4,
            cluster_local_domain: ".cluster.local".to_string(),
            alarm_config: None,
            max_consecutive_failures: 5,
            dry_run: false,
            endpoints_file: None,
        }
    }
}

impl ControllerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds)
    }

    pub fn cert_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.cert_refresh_interval_seconds)
    }

    /// Grace period as a chrono duration for timestamp arithmetic
    pub fn deletion_grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.deletion_grace_period_seconds as i64)
    }

    pub fn min_load_balancer_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_load_balancer_age_seconds as i64)
    }

    /// Split `alarm_config` into namespace and name
    pub fn alarm_config_ref(&self) -> Option<(&str, &str)> {
        let (namespace, name) = self.alarm_config.as_deref()?.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((namespace, name))
    }
}

/// Certificate source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct CertificatesConfig {
    /// Directories scanned for `.pem`/`.crt` files
    pub pem_directories: Vec<String>,

    /// Certificates known up front, e.g. provider certificate identifiers
    pub static_certificates: Vec<CertificateSummary>,
}

impl CertificatesConfig {
    pub fn source_count(&self) -> usize {
        self.pem_directories.len() + usize::from(!self.static_certificates.is_empty())
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,

    /// Service name attached to metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            metrics_port: 9090,
            service_name: "albkeeper".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
