//! Common test utilities for the integration tests.
//!
//! Wires a [`ReconciliationDriver`] to the in-memory orchestrator, cloud and a
//! static certificate source.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::sync::Arc;

use albkeeper::certificates::{CertificateSource, CertificateStore, StaticCertificateSource};
use albkeeper::config::ControllerConfig;
use albkeeper::domain::{CertificateSummary, Endpoint, EndpointId, Stack};
use albkeeper::provider::{MemoryCloud, MemoryOrchestrator};
use albkeeper::services::ReconciliationDriver;
use chrono::{Duration, Utc};

pub const CLUSTER_ID: &str = "test-cluster";

pub struct Harness {
    pub orchestrator: Arc<MemoryOrchestrator>,
    pub cloud: Arc<MemoryCloud>,
    pub driver: ReconciliationDriver,
}

impl Harness {
    pub async fn new(certificates: Vec<CertificateSummary>) -> Self {
        Self::with_config(certificates, config()).await
    }

    pub async fn with_config(certificates: Vec<CertificateSummary>, config: ControllerConfig) -> Self {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let cloud = Arc::new(MemoryCloud::new());
        let source: Arc<dyn CertificateSource> = Arc::new(StaticCertificateSource::new("static", certificates));
        let store = Arc::new(CertificateStore::new(vec![source]));
        store.refresh().await.expect("static certificates load");

        let driver = ReconciliationDriver::new(orchestrator.clone(), cloud.clone(), store, config);
        Self { orchestrator, cloud, driver }
    }

    pub async fn stacks(&self) -> Vec<Stack> {
        self.cloud.stacks().await
    }

    /// Make every stack old enough for the cutover gate
    pub async fn age_stacks(&self, by: Duration) {
        for stack in self.cloud.stacks().await {
            self.cloud.set_created_at(&stack.name, Utc::now() - by).await;
        }
    }
}

pub fn config() -> ControllerConfig {
    ControllerConfig { cluster_id: CLUSTER_ID.to_string(), ..ControllerConfig::default() }
}

/// Certificate valid from a day ago for `days` days ahead
pub fn certificate(id: &str, domains: &[&str], days: i64) -> CertificateSummary {
    let now = Utc::now();
    CertificateSummary::new(
        id,
        domains.iter().map(|d| d.to_string()).collect(),
        now - Duration::days(1),
        now + Duration::days(days),
    )
}

pub fn ingress(name: &str, hostnames: &[&str]) -> Endpoint {
    Endpoint::new(EndpointId::ingress("default", name), hostnames.iter().map(|h| h.to_string()).collect())
}

/// Certificate ids recorded on a stack
pub fn stack_certificates(stack: &Stack) -> Vec<String> {
    stack
        .tags
        .certificates()
        .expect("readable certificate tags")
        .keys()
        .map(|id| id.to_string())
        .collect()
}
