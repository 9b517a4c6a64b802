//! Reconciliation driver
//!
//! Runs one pass at a time: list endpoints, resolve certificates, load alarm
//! definitions, scan stacks, group, reconcile, write statuses behind the
//! cutover gate, clean up orphans and sync targets. Every failure inside a
//! pass is collected in the [`PassReport`]; the polling loop keeps going
//! whatever a pass reports, including a panic.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use super::cutover::CutoverGate;
use super::grouping::{GroupingEngine, ResolvedEndpoint};
use super::report::{PassReport, Problem, StatusChanges};
use super::stack_reconciler::StackReconciler;
use super::target_sync::TargetSync;
use crate::certificates::{self, CertificateSnapshot, CertificateStore};
use crate::config::ControllerConfig;
use crate::domain::{AlarmSet, Endpoint, LoadBalancerDescriptor};
use crate::errors::ControllerError;
use crate::observability::metrics;
use crate::pass_span;
use crate::provider::{CloudProvisioner, OrchestratorClient};

/// Counts failed passes in a row and decides when to escalate.
#[derive(Debug, Clone, Copy)]
pub struct FailureTracker {
    consecutive: u32,
    threshold: u32,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self { consecutive: 0, threshold }
    }

    /// Record a pass outcome and return the current streak of failures
    pub fn observe(&mut self, failed: bool) -> u32 {
        self.consecutive = if failed { self.consecutive.saturating_add(1) } else { 0 };
        self.consecutive
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn escalated(&self) -> bool {
        self.consecutive >= self.threshold
    }
}

#[derive(Debug)]
pub struct ReconciliationDriver {
    orchestrator: Arc<dyn OrchestratorClient>,
    cloud: Arc<dyn CloudProvisioner>,
    certificates: Arc<CertificateStore>,
    config: ControllerConfig,
    grouping: GroupingEngine,
    reconciler: StackReconciler,
    gate: CutoverGate,
    targets: TargetSync,
}

impl ReconciliationDriver {
    pub fn new(
        orchestrator: Arc<dyn OrchestratorClient>,
        cloud: Arc<dyn CloudProvisioner>,
        certificates: Arc<CertificateStore>,
        config: ControllerConfig,
    ) -> Self {
        let grouping = GroupingEngine::new(config.max_certs_per_load_balancer, config.default_ssl_policy.clone());
        let reconciler = StackReconciler::new(
            cloud.clone(),
            config.cluster_id.clone(),
            config.deletion_grace_period(),
            config.dry_run,
        );
        let gate = CutoverGate::new(config.min_load_balancer_age());
        let targets = TargetSync::new(cloud.clone(), config.cluster_id.clone(), config.dry_run);
        Self { orchestrator, cloud, certificates, config, grouping, reconciler, gate, targets }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one pass now and record its metrics.
    pub async fn run_pass(&self) -> PassReport {
        let started = Instant::now();
        let report = self.run_pass_at(Utc::now()).instrument(pass_span!(self.config.cluster_id)).await;

        for problem in &report.problems {
            metrics::record_problem(problem.kind()).await;
        }
        metrics::record_pass(started.elapsed().as_secs_f64(), report.problems.len()).await;
        report
    }

    /// Run one pass as of `now`.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();

        let endpoints = match self.orchestrator.list_endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                error!(error = %e, "Listing endpoints failed, ending pass");
                report.push_problem("endpoints", e);
                return report;
            }
        };
        report.endpoints = endpoints.len();

        let snapshot = self.certificates.snapshot().await;
        let resolved = self.resolve_certificates(endpoints, &snapshot, now, &mut report);
        let alarms = self.load_alarms(&mut report).await;

        let stacks = match self.cloud.list_tagged_stacks(&self.config.cluster_id).await {
            Ok(stacks) => stacks,
            Err(e) => {
                error!(error = %e, "Listing stacks failed, ending pass");
                report.push_problem("stacks", e);
                return report;
            }
        };

        let grouping = self.grouping.group(&stacks, &resolved, alarms.as_ref(), now);
        report.problems.extend(grouping.problems);
        report.descriptors = grouping.descriptors.iter().filter(|d| d.has_endpoints()).count();

        let (desired, orphaned): (Vec<&LoadBalancerDescriptor>, Vec<&LoadBalancerDescriptor>) =
            grouping.descriptors.iter().partition(|d| d.has_endpoints());

        self.reconciler.reconcile_desired(desired.iter().copied(), now, &mut report.stacks, &mut report.problems).await;

        for descriptor in &desired {
            self.write_statuses(descriptor, now, &mut report).await;
        }

        self.reconciler
            .cleanup_orphans(
                orphaned.iter().filter_map(|d| d.existing.as_ref()),
                now,
                &mut report.stacks,
                &mut report.problems,
            )
            .await;

        self.targets.sync(&stacks, &mut report.targets, &mut report.problems).await;

        report
    }

    /// Resolve the certificates of every endpoint. Endpoints left without any
    /// certificate are dropped from the pass.
    fn resolve_certificates(
        &self,
        endpoints: Vec<Endpoint>,
        snapshot: &CertificateSnapshot,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) -> Vec<ResolvedEndpoint> {
        let mut resolved = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let mut ids = BTreeSet::new();
            let mut failed = false;

            if let Some(id) = &endpoint.certificate_id {
                ids.insert(id.clone());
            } else {
                for hostname in endpoint.certificate_hostnames(&self.config.cluster_local_domain) {
                    match certificates::find_best_match(snapshot, hostname, now) {
                        Ok(certificate) => {
                            ids.insert(certificate.id.clone());
                        }
                        Err(e) => {
                            warn!(endpoint = %endpoint.id, hostname, error = %e, "Certificate resolution failed");
                            report.push_problem(format!("endpoint {}", endpoint.id), e);
                            failed = true;
                        }
                    }
                }
            }

            if ids.is_empty() {
                if !failed {
                    report.push_problem(
                        format!("endpoint {}", endpoint.id),
                        ControllerError::validation_field("endpoint has no hostname needing a certificate", "hostnames"),
                    );
                }
                debug!(endpoint = %endpoint.id, "Skipping endpoint without certificate");
                continue;
            }
            resolved.push(ResolvedEndpoint::new(endpoint, ids));
        }
        resolved
    }

    /// Alarm definitions for this pass. `None` when the configuration exists
    /// but cannot be read, so existing stacks keep their alarms.
    async fn load_alarms(&self, report: &mut PassReport) -> Option<AlarmSet> {
        let Some((namespace, name)) = self.config.alarm_config_ref() else {
            return Some(AlarmSet::default());
        };

        let resource = match self.orchestrator.get_config_resource(namespace, name).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => {
                debug!(namespace, name, "No alarm configuration");
                return Some(AlarmSet::default());
            }
            Err(e) => {
                warn!(namespace, name, error = %e, "Reading alarm configuration failed");
                report.push_problem(format!("alarm config {}/{}", namespace, name), e);
                return None;
            }
        };

        match AlarmSet::from_config_resource(&resource) {
            Ok(alarms) => Some(alarms),
            Err(e) => {
                warn!(namespace, name, error = %e, "Malformed alarm configuration, keeping existing alarms");
                report.push_problem(format!("alarm config {}/{}", namespace, name), e);
                None
            }
        }
    }

    /// Report the stack address to the descriptor's endpoints once the
    /// cutover gate allows it.
    async fn write_statuses(&self, descriptor: &LoadBalancerDescriptor, now: DateTime<Utc>, report: &mut PassReport) {
        let Some(existing) = &descriptor.existing else {
            return;
        };
        let Some(address) = existing.stack.address() else {
            return;
        };

        let endpoints = descriptor.endpoints();
        if !self.gate.allows(&existing.stack, now) {
            debug!(
                stack = %existing.name(),
                remaining_seconds = self.gate.remaining(&existing.stack, now).num_seconds(),
                "Stack too young, withholding status updates"
            );
            report.statuses.withheld += endpoints.len();
            return;
        }

        for endpoint in endpoints {
            self.write_status(endpoint, address, &mut report.statuses, &mut report.problems).await;
        }
    }

    async fn write_status(
        &self,
        endpoint: &Endpoint,
        address: &str,
        statuses: &mut StatusChanges,
        problems: &mut Vec<Problem>,
    ) {
        if endpoint.skip_dns_rewrite {
            statuses.skipped += 1;
            return;
        }
        if self.config.dry_run {
            info!(endpoint = %endpoint.id, address, "Would update endpoint status");
            statuses.updated += 1;
            return;
        }

        match self.orchestrator.update_endpoint_status(endpoint, address).await {
            Ok(()) => {
                info!(endpoint = %endpoint.id, address, "Updated endpoint status");
                metrics::record_change("endpoint", "status").await;
                statuses.updated += 1;
            }
            Err(ControllerError::NoUpdateNeeded { .. }) => statuses.unchanged += 1,
            Err(e) => {
                warn!(endpoint = %endpoint.id, error = %e, "Updating endpoint status failed");
                problems.push(Problem::new(format!("endpoint {}", endpoint.id), e));
            }
        }
    }

    /// Poll until `shutdown` resolves. Passes never overlap; the interval is
    /// measured from the end of one pass to the start of the next.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut failures = FailureTracker::new(self.config.max_consecutive_failures);
        let interval = self.config.polling_interval();

        info!(
            cluster_id = %self.config.cluster_id,
            interval_seconds = interval.as_secs(),
            dry_run = self.config.dry_run,
            "Starting reconciliation loop"
        );

        loop {
            let failed = match AssertUnwindSafe(self.run_pass()).catch_unwind().await {
                Ok(report) => {
                    report.log_summary();
                    !report.is_success()
                }
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "Reconciliation pass panicked");
                    metrics::record_pass_fault().await;
                    true
                }
            };

            let streak = failures.observe(failed);
            metrics::set_consecutive_failed_passes(streak).await;
            if failures.escalated() {
                error!(consecutive_failures = streak, "Reconciliation keeps failing");
            } else if streak > 0 {
                warn!(consecutive_failures = streak, "Reconciliation pass failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping reconciliation loop");
                    break;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
