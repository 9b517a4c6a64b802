//! Stack reconciler
//!
//! Turns descriptors into provisioning calls. The decision for each stack is
//! a pure function ([`plan_desired`], [`plan_orphan`]) so the state machine can
//! be tested without a provider; [`StackReconciler`] executes the plan.
//!
//! Desired stacks:
//!
//! | Existing stack | Status                          | Action          |
//! |----------------|---------------------------------|-----------------|
//! | none           |                                 | create          |
//! | some           | in progress or deleting         | wait            |
//! | some           | failed                          | report          |
//! | some           | complete, drifted or scheduled  | update          |
//! | some           | complete, in sync               | nothing         |
//!
//! Orphaned stacks are deleted right away when failed, otherwise scheduled for
//! deletion and removed once the schedule and every certificate TTL elapsed.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn, Instrument};

use super::report::{Problem, StackChanges};
use crate::domain::{LoadBalancerDescriptor, ObservedStack, StackName, StackSpec};
use crate::errors::{ControllerError, Result};
use crate::observability::metrics;
use crate::provider::CloudProvisioner;
use crate::stack_span;

/// What to do with a descriptor that has endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredAction {
    Create,
    /// A provider operation is still running
    Wait,
    /// Stack is in a failed state; reported, not retried
    Failed,
    Update { drift: Vec<&'static str> },
    InSync,
}

/// What to do with an existing stack no endpoint uses any more
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanAction {
    Delete,
    ScheduleDeletion { at: DateTime<Utc> },
    /// Deleting already, or waiting for the schedule or a certificate TTL
    Keep,
}

pub fn plan_desired(descriptor: &LoadBalancerDescriptor, now: DateTime<Utc>, grace: Duration) -> DesiredAction {
    let Some(existing) = &descriptor.existing else {
        return DesiredAction::Create;
    };

    let status = existing.stack.status;
    if status.is_failed() {
        return DesiredAction::Failed;
    }
    if status.is_in_progress() || status.is_deleting() {
        return DesiredAction::Wait;
    }

    let drift = descriptor.drift(now, grace);
    if drift.is_empty() {
        DesiredAction::InSync
    } else {
        DesiredAction::Update { drift }
    }
}

pub fn plan_orphan(stack: &ObservedStack, now: DateTime<Utc>, grace: Duration) -> OrphanAction {
    let status = stack.stack.status;
    if status.is_deleting() {
        return OrphanAction::Keep;
    }
    if status.is_failed() {
        return OrphanAction::Delete;
    }

    match stack.deletion_scheduled_at {
        None => OrphanAction::ScheduleDeletion { at: now + grace },
        Some(at) if at <= now && !stack.has_pending_certificates(now) => OrphanAction::Delete,
        Some(_) => OrphanAction::Keep,
    }
}

/// Issues create, update, schedule and delete calls for one cluster.
#[derive(Debug, Clone)]
pub struct StackReconciler {
    cloud: Arc<dyn CloudProvisioner>,
    cluster_id: String,
    grace: Duration,
    dry_run: bool,
}

impl StackReconciler {
    pub fn new(cloud: Arc<dyn CloudProvisioner>, cluster_id: impl Into<String>, grace: Duration, dry_run: bool) -> Self {
        Self { cloud, cluster_id: cluster_id.into(), grace, dry_run }
    }

    /// Fresh stack name, `<cluster>-<8 hex chars>`
    pub fn new_stack_name(&self) -> StackName {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        StackName::new(format!("{}-{}", self.cluster_id, &suffix[..8]))
    }

    /// Bring every descriptor with endpoints to its desired state. Failures are
    /// independent of each other.
    #[instrument(skip_all, fields(cluster_id = %self.cluster_id))]
    pub async fn reconcile_desired<'a, I>(
        &self,
        descriptors: I,
        now: DateTime<Utc>,
        changes: &mut StackChanges,
        problems: &mut Vec<Problem>,
    ) where
        I: IntoIterator<Item = &'a LoadBalancerDescriptor>,
    {
        for descriptor in descriptors {
            let action = plan_desired(descriptor, now, self.grace);
            let scope = match descriptor.stack_name() {
                Some(name) => format!("stack {}", name),
                None => format!("new load balancer for {}", describe_endpoints(descriptor)),
            };

            match self.apply_desired(descriptor, &action, now).await {
                Ok(()) => match action {
                    DesiredAction::Create => changes.created += 1,
                    DesiredAction::Update { .. } => changes.updated += 1,
                    DesiredAction::InSync => changes.unchanged += 1,
                    DesiredAction::Wait => changes.waiting += 1,
                    DesiredAction::Failed => {}
                },
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Stack reconciliation failed");
                    problems.push(Problem::new(scope, e));
                }
            }
        }
    }

    /// Schedule or delete stacks no endpoint uses any more.
    #[instrument(skip_all, fields(cluster_id = %self.cluster_id))]
    pub async fn cleanup_orphans<'a, I>(
        &self,
        orphans: I,
        now: DateTime<Utc>,
        changes: &mut StackChanges,
        problems: &mut Vec<Problem>,
    ) where
        I: IntoIterator<Item = &'a ObservedStack>,
    {
        for orphan in orphans {
            let action = plan_orphan(orphan, now, self.grace);
            match self.apply_orphan(orphan, &action).await {
                Ok(()) => match action {
                    OrphanAction::Delete => changes.deleted += 1,
                    OrphanAction::ScheduleDeletion { .. } => changes.scheduled += 1,
                    OrphanAction::Keep => {}
                },
                Err(e) => {
                    warn!(stack = %orphan.name(), error = %e, "Orphan cleanup failed");
                    problems.push(Problem::new(format!("stack {}", orphan.name()), e));
                }
            }
        }
    }

    async fn apply_desired(
        &self,
        descriptor: &LoadBalancerDescriptor,
        action: &DesiredAction,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match action {
            DesiredAction::Create => {
                let name = self.new_stack_name();
                let spec = descriptor.to_stack_spec(name.clone(), &self.cluster_id, now, self.grace);
                info!(
                    stack = %name,
                    certificates = spec.certificates.len(),
                    endpoints = %describe_endpoints(descriptor),
                    dry_run = self.dry_run,
                    "Creating stack"
                );
                self.create(&spec).instrument(stack_span!("create", name)).await
            }
            DesiredAction::Update { drift } => {
                let name = existing_name(descriptor)?;
                let spec = descriptor.to_stack_spec(name.clone(), &self.cluster_id, now, self.grace);
                info!(stack = %name, drift = ?drift, dry_run = self.dry_run, "Updating stack");
                self.update(&spec).instrument(stack_span!("update", name)).await
            }
            DesiredAction::Failed => {
                let existing = existing_stack(descriptor)?;
                Err(ControllerError::provider(
                    "reconcile_stack",
                    format!("stack is in state {} and needs manual attention", existing.stack.status),
                ))
            }
            DesiredAction::Wait => {
                let existing = existing_stack(descriptor)?;
                debug!(stack = %existing.name(), status = %existing.stack.status, "Waiting for stack");
                Ok(())
            }
            DesiredAction::InSync => Ok(()),
        }
    }

    async fn apply_orphan(&self, orphan: &ObservedStack, action: &OrphanAction) -> Result<()> {
        let name = orphan.name();
        match action {
            OrphanAction::ScheduleDeletion { at } => {
                info!(stack = %name, at = %at, dry_run = self.dry_run, "Scheduling stack deletion");
                self.schedule_deletion(name, *at).instrument(stack_span!("schedule_delete", name)).await
            }
            OrphanAction::Delete => {
                info!(stack = %name, status = %orphan.stack.status, dry_run = self.dry_run, "Deleting stack");
                self.delete(name).instrument(stack_span!("delete", name)).await
            }
            OrphanAction::Keep => {
                debug!(stack = %name, scheduled_at = ?orphan.deletion_scheduled_at, "Keeping orphaned stack for now");
                Ok(())
            }
        }
    }

    async fn create(&self, spec: &StackSpec) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        self.cloud.create_stack(spec).await?;
        metrics::record_change("stack", "create").await;
        Ok(())
    }

    async fn update(&self, spec: &StackSpec) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        self.cloud.update_stack(spec).await?;
        metrics::record_change("stack", "update").await;
        Ok(())
    }

    async fn schedule_deletion(&self, name: &StackName, at: DateTime<Utc>) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        self.cloud.schedule_stack_deletion(name, at).await?;
        metrics::record_change("stack", "schedule_delete").await;
        Ok(())
    }

    async fn delete(&self, name: &StackName) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        self.cloud.delete_stack(name).await?;
        metrics::record_change("stack", "delete").await;
        Ok(())
    }
}

fn existing_stack(descriptor: &LoadBalancerDescriptor) -> Result<&ObservedStack> {
    descriptor.existing.as_ref().ok_or_else(|| ControllerError::internal("descriptor has no existing stack"))
}

fn existing_name(descriptor: &LoadBalancerDescriptor) -> Result<&StackName> {
    existing_stack(descriptor).map(ObservedStack::name)
}

fn describe_endpoints(descriptor: &LoadBalancerDescriptor) -> String {
    descriptor.endpoints().iter().map(|e| e.id.to_string()).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AlarmSet, CertificateId, CertificateSchedule, CompatibilityKey, Endpoint, EndpointId, Stack, StackStatus,
        StackTags,
    };
    use crate::provider::MemoryCloud;
    use std::collections::BTreeSet;

    const POLICY: &str = "ELBSecurityPolicy-2016-08";

    fn endpoint(name: &str) -> Endpoint {
        Endpoint::new(EndpointId::ingress("default", name), vec![format!("{}.example.org", name)])
    }

    fn certs(ids: &[&str]) -> BTreeSet<CertificateId> {
        ids.iter().map(|c| CertificateId::from(*c)).collect()
    }

    fn observed(status: StackStatus, schedule: CertificateSchedule, deletion: Option<DateTime<Utc>>) -> ObservedStack {
        let now = Utc::now();
        let mut tags = StackTags::owned_by("cluster-a");
        tags.set_compatibility(&CompatibilityKey::for_endpoint(&endpoint("seed"), POLICY));
        tags.set_shared(true);
        tags.set_certificates(&schedule);
        tags.set_deletion_scheduled_at(deletion);
        ObservedStack::decode(Stack {
            name: StackName::new("cluster-a-1"),
            status,
            dns_name: Some("cluster-a-1.elb.local".to_string()),
            target_group: None,
            created_at: now - Duration::hours(2),
            tags,
        })
        .unwrap()
    }

    fn kept(ids: &[&str]) -> CertificateSchedule {
        ids.iter().map(|c| (CertificateId::from(*c), None)).collect()
    }

    #[test]
    fn desired_decision_table() {
        let now = Utc::now();
        let grace = Duration::hours(1);

        let mut fresh = LoadBalancerDescriptor::shared(CompatibilityKey::for_endpoint(&endpoint("a"), POLICY), None);
        fresh.add_endpoint(&endpoint("a"), &certs(&["c1"]));
        assert_eq!(plan_desired(&fresh, now, grace), DesiredAction::Create);

        let with = |status: StackStatus, deletion: Option<DateTime<Utc>>| {
            let mut d = LoadBalancerDescriptor::from_stack(observed(status, kept(&["c1"]), deletion), None);
            d.add_endpoint(&endpoint("a"), &certs(&["c1"]));
            d
        };

        assert_eq!(plan_desired(&with(StackStatus::CreateInProgress, None), now, grace), DesiredAction::Wait);
        assert_eq!(plan_desired(&with(StackStatus::DeleteInProgress, None), now, grace), DesiredAction::Wait);
        assert_eq!(plan_desired(&with(StackStatus::RollbackComplete, None), now, grace), DesiredAction::Failed);
        assert_eq!(plan_desired(&with(StackStatus::CreateComplete, None), now, grace), DesiredAction::InSync);
        assert_eq!(
            plan_desired(&with(StackStatus::UpdateComplete, Some(now + grace)), now, grace),
            DesiredAction::Update { drift: vec!["deletion_schedule"] }
        );

        let mut alarmed = with(StackStatus::CreateComplete, None);
        alarmed.alarms = Some(AlarmSet::new(vec![serde_yaml::from_str(
            "{AlarmName: 5xx, MetricName: HTTPCode_ELB_5XX_Count, Statistic: Sum, Period: 60, EvaluationPeriods: 1, Threshold: 1, ComparisonOperator: GreaterThanThreshold}",
        )
        .unwrap()]));
        assert_eq!(plan_desired(&alarmed, now, grace), DesiredAction::Update { drift: vec!["alarms"] });
    }

    #[test]
    fn orphan_decision_table() {
        let now = Utc::now();
        let grace = Duration::hours(1);

        let unscheduled = observed(StackStatus::CreateComplete, kept(&["c1"]), None);
        assert_eq!(plan_orphan(&unscheduled, now, grace), OrphanAction::ScheduleDeletion { at: now + grace });

        let pending = observed(StackStatus::CreateComplete, kept(&["c1"]), Some(now + Duration::minutes(5)));
        assert_eq!(plan_orphan(&pending, now, grace), OrphanAction::Keep);

        let elapsed = observed(StackStatus::CreateComplete, kept(&["c1"]), Some(now - Duration::minutes(5)));
        assert_eq!(plan_orphan(&elapsed, now, grace), OrphanAction::Delete);

        let mut ttl = CertificateSchedule::new();
        ttl.insert(CertificateId::from("c1"), Some(now + Duration::minutes(10)));
        let waiting_on_certificate = observed(StackStatus::CreateComplete, ttl, Some(now - Duration::minutes(5)));
        assert_eq!(plan_orphan(&waiting_on_certificate, now, grace), OrphanAction::Keep);

        let failed = observed(StackStatus::CreateFailed, kept(&["c1"]), None);
        assert_eq!(plan_orphan(&failed, now, grace), OrphanAction::Delete);

        let deleting = observed(StackStatus::DeleteInProgress, kept(&["c1"]), None);
        assert_eq!(plan_orphan(&deleting, now, grace), OrphanAction::Keep);
    }

    #[tokio::test]
    async fn create_uses_cluster_prefixed_name() {
        let cloud = Arc::new(MemoryCloud::new());
        let reconciler = StackReconciler::new(cloud.clone(), "cluster-a", Duration::hours(1), false);

        let mut descriptor =
            LoadBalancerDescriptor::shared(CompatibilityKey::for_endpoint(&endpoint("a"), POLICY), None);
        descriptor.add_endpoint(&endpoint("a"), &certs(&["c1"]));

        let mut changes = StackChanges::default();
        let mut problems = Vec::new();
        reconciler.reconcile_desired([&descriptor], Utc::now(), &mut changes, &mut problems).await;

        assert!(problems.is_empty());
        assert_eq!(changes.created, 1);
        let stacks = cloud.stacks().await;
        assert_eq!(stacks.len(), 1);
        let name = stacks[0].name.as_str();
        assert!(name.starts_with("cluster-a-"));
        assert_eq!(name.len(), "cluster-a-".len() + 8);
        assert_eq!(stacks[0].tags.certificates().unwrap(), kept(&["c1"]));
    }

    #[tokio::test]
    async fn dry_run_issues_no_calls() {
        let cloud = Arc::new(MemoryCloud::new());
        let reconciler = StackReconciler::new(cloud.clone(), "cluster-a", Duration::hours(1), true);

        let mut descriptor =
            LoadBalancerDescriptor::shared(CompatibilityKey::for_endpoint(&endpoint("a"), POLICY), None);
        descriptor.add_endpoint(&endpoint("a"), &certs(&["c1"]));

        let mut changes = StackChanges::default();
        let mut problems = Vec::new();
        reconciler.reconcile_desired([&descriptor], Utc::now(), &mut changes, &mut problems).await;

        assert_eq!(changes.created, 1);
        assert!(cloud.stacks().await.is_empty());
    }

    #[tokio::test]
    async fn failures_are_independent() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.inject_failure("schedule_stack_deletion").await;
        let reconciler = StackReconciler::new(cloud.clone(), "cluster-a", Duration::hours(1), false);

        let now = Utc::now();
        let scheduled = observed(StackStatus::CreateComplete, kept(&["c1"]), None);
        let mut failed = observed(StackStatus::CreateFailed, kept(&["c2"]), None);
        failed.stack.name = StackName::new("cluster-a-2");
        cloud.insert_stack(scheduled.stack.clone()).await;
        cloud.insert_stack(failed.stack.clone()).await;

        let mut changes = StackChanges::default();
        let mut problems = Vec::new();
        reconciler.cleanup_orphans([&scheduled, &failed], now, &mut changes, &mut problems).await;

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].scope, "stack cluster-a-1");
        assert_eq!(changes.deleted, 1);
        assert!(cloud.stack(&StackName::new("cluster-a-2")).await.is_none());
    }

    #[tokio::test]
    async fn failed_desired_stack_is_reported() {
        let cloud = Arc::new(MemoryCloud::new());
        let reconciler = StackReconciler::new(cloud.clone(), "cluster-a", Duration::hours(1), false);

        let mut descriptor =
            LoadBalancerDescriptor::from_stack(observed(StackStatus::RollbackComplete, kept(&["c1"]), None), None);
        descriptor.add_endpoint(&endpoint("a"), &certs(&["c1"]));

        let mut changes = StackChanges::default();
        let mut problems = Vec::new();
        reconciler.reconcile_desired([&descriptor], Utc::now(), &mut changes, &mut problems).await;

        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].kind(), "provider");
        assert_eq!(changes, StackChanges::default());
    }
}
