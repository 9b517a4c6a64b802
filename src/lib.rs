//! # albkeeper
//!
//! A control loop that keeps cloud load-balancer stacks converged with the
//! ingress endpoints declared in a cluster.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator → certificate resolution → grouping → stack reconciler → cloud provider
//!      ↑                                                      ↓
//!      └──────────────── gated status write-back ─────────────┘
//! ```
//!
//! ## Core Components
//!
//! - **Certificate store**: snapshots certificates from pluggable sources and
//!   picks the best match per hostname
//! - **Grouping engine**: packs endpoints onto shared or dedicated load
//!   balancers under compatibility and certificate-count limits
//! - **Stack reconciler**: creates, updates, schedules and deletes stacks; all
//!   state between passes lives in stack tags
//! - **Cutover gate**: holds back status writes until a load balancer is old
//!   enough to route traffic
//! - **Driver**: runs the passes on a timer and collects problems instead of
//!   stopping on them
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use albkeeper::certificates::CertificateStore;
//! use albkeeper::config::ControllerConfig;
//! use albkeeper::provider::{MemoryCloud, MemoryOrchestrator};
//! use albkeeper::services::ReconciliationDriver;
//!
//! #[tokio::main]
//! async fn main() {
//!     let driver = ReconciliationDriver::new(
//!         Arc::new(MemoryOrchestrator::new()),
//!         Arc::new(MemoryCloud::new()),
//!         Arc::new(CertificateStore::new(Vec::new())),
//!         ControllerConfig::default(),
//!     );
//!     let report = driver.run_pass().await;
//!     assert!(report.is_success());
//! }
//! ```

pub mod certificates;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod provider;
pub mod services;

// Re-export commonly used types and traits
pub use config::{load_config, AppConfig};
pub use errors::{ControllerError, Result};
pub use services::{PassReport, ReconciliationDriver};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
