//! Routing target membership
//!
//! Keeps every complete stack's target group in line with the running cluster
//! instances: missing instances are registered, stale ones deregistered.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::report::{Problem, TargetChanges};
use crate::domain::{InstanceId, Stack};
use crate::errors::Result;
use crate::observability::metrics;
use crate::provider::CloudProvisioner;

#[derive(Debug, Clone)]
pub struct TargetSync {
    cloud: Arc<dyn CloudProvisioner>,
    cluster_id: String,
    dry_run: bool,
}

impl TargetSync {
    pub fn new(cloud: Arc<dyn CloudProvisioner>, cluster_id: impl Into<String>, dry_run: bool) -> Self {
        Self { cloud, cluster_id: cluster_id.into(), dry_run }
    }

    /// Sync the target groups of `stacks`. Instances are listed once.
    #[instrument(skip_all, fields(cluster_id = %self.cluster_id, stacks = stacks.len()))]
    pub async fn sync(&self, stacks: &[Stack], changes: &mut TargetChanges, problems: &mut Vec<Problem>) {
        let routable: Vec<(&Stack, &str)> = stacks
            .iter()
            .filter(|stack| stack.status.is_complete())
            .filter_map(|stack| stack.target_group.as_deref().map(|tg| (stack, tg)))
            .collect();
        if routable.is_empty() {
            return;
        }

        let instances: BTreeSet<InstanceId> = match self.cloud.list_cluster_instances(&self.cluster_id).await {
            Ok(instances) => instances.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "Listing cluster instances failed, skipping target sync");
                problems.push(Problem::new(format!("instances of {}", self.cluster_id), e));
                return;
            }
        };

        for (stack, target_group) in routable {
            if let Err(e) = self.sync_target_group(target_group, &instances, changes).await {
                warn!(stack = %stack.name, target_group, error = %e, "Target sync failed");
                problems.push(Problem::new(format!("target group {}", target_group), e));
            }
        }
    }

    async fn sync_target_group(
        &self,
        target_group: &str,
        instances: &BTreeSet<InstanceId>,
        changes: &mut TargetChanges,
    ) -> Result<()> {
        let registered: BTreeSet<InstanceId> =
            self.cloud.list_registered_targets(target_group).await?.into_iter().collect();

        let missing: Vec<InstanceId> = instances.difference(&registered).cloned().collect();
        let stale: Vec<InstanceId> = registered.difference(instances).cloned().collect();
        if missing.is_empty() && stale.is_empty() {
            debug!(target_group, "Targets in sync");
            return Ok(());
        }

        if !missing.is_empty() {
            info!(target_group, instances = ?missing, dry_run = self.dry_run, "Registering targets");
            if !self.dry_run {
                self.cloud.register_targets(target_group, &missing).await?;
                metrics::record_change("target", "register").await;
            }
            changes.registered += missing.len();
        }
        if !stale.is_empty() {
            info!(target_group, instances = ?stale, dry_run = self.dry_run, "Deregistering targets");
            if !self.dry_run {
                self.cloud.deregister_targets(target_group, &stale).await?;
                metrics::record_change("target", "deregister").await;
            }
            changes.deregistered += stale.len();
        }
        Ok(())
    }
}
