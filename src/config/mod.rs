//! # Configuration Management
//!
//! Configuration is layered: struct defaults, then an optional YAML or TOML
//! file, then `ALBKEEPER_*` environment variables. Nested keys use `__`, so
//! `ALBKEEPER_CONTROLLER__CLUSTER_ID` sets `controller.cluster_id`.

pub mod settings;

pub use settings::{
    is_known_ssl_policy, AppConfig, CertificatesConfig, ControllerConfig, ObservabilityConfig,
    SSL_POLICIES,
};

use crate::errors::Result;
use std::path::Path;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ALBKEEPER";

/// Load and validate configuration from `path` (if any) and the environment.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("certificates.pem_directories"),
    );

    let config: AppConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
controller:
  cluster_id: prod-eu
  max_certs_per_load_balancer: 10
  alarm_config: kube-system/albkeeper-alarms
certificates:
  pem_directories: [/etc/albkeeper/certs]
observability:
  enable_metrics: false
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.controller.cluster_id, "prod-eu");
        assert_eq!(config.controller.max_certs_per_load_balancer, 10);
        assert_eq!(config.controller.polling_interval_seconds, 30);
        assert_eq!(config.certificates.pem_directories, vec!["/etc/albkeeper/certs"]);
        assert!(!config.observability.enable_metrics);
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "controller:\n  max_certs_per_load_balancer: 40\n").unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/albkeeper.yaml"))).unwrap_err();
        assert!(matches!(err, crate::errors::ControllerError::Config { .. }));
    }
}
