//! # Command Line Interface
//!
//! Flags override values from the configuration file and environment.

use clap::Parser;
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "albkeeper")]
#[command(about = "Keeps cloud load-balancer stacks converged with cluster ingress endpoints")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file path (YAML or TOML)
    #[arg(short, long, env = "ALBKEEPER_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Cluster id used to tag and find owned stacks
    #[arg(long)]
    pub cluster_id: Option<String>,

    /// YAML file declaring endpoints and config resources
    #[arg(long)]
    pub endpoints_file: Option<String>,

    /// Seconds between reconciliation passes
    #[arg(long, value_name = "SECONDS")]
    pub polling_interval: Option<u64>,

    /// Log decisions without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Apply command line overrides on top of loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(cluster_id) = &self.cluster_id {
            config.controller.cluster_id = cluster_id.clone();
        }
        if let Some(path) = &self.endpoints_file {
            config.controller.endpoints_file = Some(path.clone());
        }
        if let Some(seconds) = self.polling_interval {
            config.controller.polling_interval_seconds = seconds;
        }
        if self.dry_run {
            config.controller.dry_run = true;
        }
        if self.verbose {
            config.observability.log_level = "debug".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "albkeeper",
            "--cluster-id",
            "prod-eu",
            "--polling-interval",
            "10",
            "--dry-run",
            "--once",
        ])
        .unwrap();

        assert_eq!(cli.cluster_id.as_deref(), Some("prod-eu"));
        assert!(cli.once);

        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.controller.cluster_id, "prod-eu");
        assert_eq!(config.controller.polling_interval_seconds, 10);
        assert!(config.controller.dry_run);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_flags_left_unset_keep_config() {
        let cli = Cli::try_parse_from(["albkeeper", "-v"]).unwrap();
        let mut config = AppConfig::default();
        config.controller.dry_run = true;
        cli.apply(&mut config);

        assert!(config.controller.dry_run);
        assert_eq!(config.controller.cluster_id, "default");
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        assert!(Cli::try_parse_from(["albkeeper", "--polling-interval", "soon"]).is_err());
    }
}
