//! In-memory cloud provisioner.
//!
//! Stacks, routing targets and cluster instances live in maps. New stacks and
//! updates settle immediately unless `settle_immediately` is off, in which case
//! they stay in progress until a test moves them on with
//! [`MemoryCloud::set_status`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::CloudProvisioner;
use crate::domain::stack::APPLICATION_TAG;
use crate::domain::{InstanceId, Stack, StackName, StackSpec, StackStatus};
use crate::errors::{ControllerError, Result};

#[derive(Debug)]
pub struct MemoryCloud {
    dns_suffix: String,
    settle_immediately: bool,
    stacks: RwLock<BTreeMap<StackName, Stack>>,
    applied_specs: RwLock<BTreeMap<StackName, StackSpec>>,
    instances: RwLock<BTreeMap<String, Vec<InstanceId>>>,
    targets: RwLock<BTreeMap<String, BTreeSet<InstanceId>>>,
    failures: RwLock<BTreeSet<String>>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self {
            dns_suffix: "elb.local".to_string(),
            settle_immediately: true,
            stacks: RwLock::new(BTreeMap::new()),
            applied_specs: RwLock::new(BTreeMap::new()),
            instances: RwLock::new(BTreeMap::new()),
            targets: RwLock::new(BTreeMap::new()),
            failures: RwLock::new(BTreeSet::new()),
        }
    }

    /// Keep created and updated stacks in progress
    pub fn with_manual_settling(mut self) -> Self {
        self.settle_immediately = false;
        self
    }

    pub async fn insert_stack(&self, stack: Stack) {
        self.stacks.write().await.insert(stack.name.clone(), stack);
    }

    pub async fn stack(&self, name: &StackName) -> Option<Stack> {
        self.stacks.read().await.get(name).cloned()
    }

    pub async fn stacks(&self) -> Vec<Stack> {
        self.stacks.read().await.values().cloned().collect()
    }

    /// Last create or update request applied to a stack
    pub async fn applied_spec(&self, name: &StackName) -> Option<StackSpec> {
        self.applied_specs.read().await.get(name).cloned()
    }

    pub async fn set_status(&self, name: &StackName, status: StackStatus) {
        if let Some(stack) = self.stacks.write().await.get_mut(name) {
            stack.status = status;
        }
    }

    pub async fn set_created_at(&self, name: &StackName, created_at: DateTime<Utc>) {
        if let Some(stack) = self.stacks.write().await.get_mut(name) {
            stack.created_at = created_at;
        }
    }

    pub async fn set_instances(&self, cluster_id: &str, instances: Vec<InstanceId>) {
        self.instances.write().await.insert(cluster_id.to_string(), instances);
    }

    pub async fn registered(&self, target_group: &str) -> BTreeSet<InstanceId> {
        self.targets.read().await.get(target_group).cloned().unwrap_or_default()
    }

    /// Make every later call of `operation` fail until cleared
    pub async fn inject_failure(&self, operation: &str) {
        self.failures.write().await.insert(operation.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    async fn check_failure(&self, operation: &str) -> Result<()> {
        if self.failures.read().await.contains(operation) {
            return Err(ControllerError::provider(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvisioner for MemoryCloud {
    async fn list_tagged_stacks(&self, cluster_id: &str) -> Result<Vec<Stack>> {
        self.check_failure("list_tagged_stacks").await?;
        Ok(self
            .stacks
            .read()
            .await
            .values()
            .filter(|stack| stack.tags.get(APPLICATION_TAG).is_some())
            .filter(|stack| stack.tags.cluster_id() == Some(cluster_id))
            .cloned()
            .collect())
    }

    async fn create_stack(&self, spec: &StackSpec) -> Result<StackName> {
        self.check_failure("create_stack").await?;

        let mut stacks = self.stacks.write().await;
        if stacks.contains_key(&spec.name) {
            return Err(ControllerError::provider("create_stack", format!("stack {} already exists", spec.name)));
        }

        let status =
            if self.settle_immediately { StackStatus::CreateComplete } else { StackStatus::CreateInProgress };
        let target_group = format!("{}-tg", spec.name);
        stacks.insert(
            spec.name.clone(),
            Stack {
                name: spec.name.clone(),
                status,
                dns_name: Some(format!("{}.{}", spec.name, self.dns_suffix)),
                target_group: Some(target_group.clone()),
                created_at: Utc::now(),
                tags: spec.tags.clone(),
            },
        );
        self.targets.write().await.entry(target_group).or_default();
        self.applied_specs.write().await.insert(spec.name.clone(), spec.clone());
        Ok(spec.name.clone())
    }

    async fn update_stack(&self, spec: &StackSpec) -> Result<()> {
        self.check_failure("update_stack").await?;

        let mut stacks = self.stacks.write().await;
        let stack = stacks
            .get_mut(&spec.name)
            .ok_or_else(|| ControllerError::not_found("stack", spec.name.as_str()))?;
        if stack.status.is_in_progress() {
            return Err(ControllerError::provider(
                "update_stack",
                format!("stack {} is {}", spec.name, stack.status),
            ));
        }

        stack.status =
            if self.settle_immediately { StackStatus::UpdateComplete } else { StackStatus::UpdateInProgress };
        stack.tags = spec.tags.clone();
        self.applied_specs.write().await.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn schedule_stack_deletion(&self, name: &StackName, at: DateTime<Utc>) -> Result<()> {
        self.check_failure("schedule_stack_deletion").await?;

        let mut stacks = self.stacks.write().await;
        let stack = stacks.get_mut(name).ok_or_else(|| ControllerError::not_found("stack", name.as_str()))?;
        stack.tags.set_deletion_scheduled_at(Some(at));
        Ok(())
    }

    async fn delete_stack(&self, name: &StackName) -> Result<()> {
        self.check_failure("delete_stack").await?;

        let removed = self.stacks.write().await.remove(name);
        let stack = removed.ok_or_else(|| ControllerError::not_found("stack", name.as_str()))?;
        if let Some(target_group) = stack.target_group {
            self.targets.write().await.remove(&target_group);
        }
        self.applied_specs.write().await.remove(name);
        Ok(())
    }

    async fn list_cluster_instances(&self, cluster_id: &str) -> Result<Vec<InstanceId>> {
        self.check_failure("list_cluster_instances").await?;
        Ok(self.instances.read().await.get(cluster_id).cloned().unwrap_or_default())
    }

    async fn list_registered_targets(&self, target_group: &str) -> Result<Vec<InstanceId>> {
        self.check_failure("list_registered_targets").await?;
        Ok(self.registered(target_group).await.into_iter().collect())
    }

    async fn register_targets(&self, target_group: &str, instances: &[InstanceId]) -> Result<()> {
        self.check_failure("register_targets").await?;
        self.targets.write().await.entry(target_group.to_string()).or_default().extend(instances.iter().cloned());
        Ok(())
    }

    async fn deregister_targets(&self, target_group: &str, instances: &[InstanceId]) -> Result<()> {
        self.check_failure("deregister_targets").await?;
        if let Some(registered) = self.targets.write().await.get_mut(target_group) {
            for instance in instances {
                registered.remove(instance);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompatibilityKey, StackTags};

    fn spec(name: &str, cluster_id: &str) -> StackSpec {
        StackSpec {
            name: StackName::new(name),
            key: CompatibilityKey {
                scheme: Default::default(),
                security_group: "sg-1".to_string(),
                ssl_policy: "ELBSecurityPolicy-2016-08".to_string(),
                load_balancer_type: Default::default(),
                ip_address_type: Default::default(),
                http2: true,
                waf_web_acl_id: None,
            },
            certificates: vec![],
            alarms: None,
            tags: StackTags::owned_by(cluster_id),
        }
    }

    #[tokio::test]
    async fn tag_scan_filters_by_cluster() {
        let cloud = MemoryCloud::new();
        cloud.create_stack(&spec("a-1", "a")).await.unwrap();
        cloud.create_stack(&spec("b-1", "b")).await.unwrap();

        let stacks = cloud.list_tagged_stacks("a").await.unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].name.as_str(), "a-1");
        assert_eq!(stacks[0].address(), Some("a-1.elb.local"));
    }

    #[tokio::test]
    async fn manual_settling_blocks_updates() {
        let cloud = MemoryCloud::new().with_manual_settling();
        let name = cloud.create_stack(&spec("a-1", "a")).await.unwrap();
        assert_eq!(cloud.stack(&name).await.unwrap().status, StackStatus::CreateInProgress);
        assert!(cloud.update_stack(&spec("a-1", "a")).await.is_err());

        cloud.set_status(&name, StackStatus::CreateComplete).await;
        cloud.update_stack(&spec("a-1", "a")).await.unwrap();
        assert_eq!(cloud.stack(&name).await.unwrap().status, StackStatus::UpdateInProgress);
    }

    #[tokio::test]
    async fn targets_register_and_deregister() {
        let cloud = MemoryCloud::new();
        let instances = vec![InstanceId::new("i-1"), InstanceId::new("i-2")];
        cloud.register_targets("tg", &instances).await.unwrap();
        cloud.deregister_targets("tg", &instances[..1]).await.unwrap();
        assert_eq!(cloud.list_registered_targets("tg").await.unwrap(), vec![InstanceId::new("i-2")]);
    }

    #[tokio::test]
    async fn delete_removes_stack() {
        let cloud = MemoryCloud::new();
        let name = cloud.create_stack(&spec("a-1", "a")).await.unwrap();
        cloud.delete_stack(&name).await.unwrap();
        assert!(cloud.stack(&name).await.is_none());
        assert!(cloud.delete_stack(&name).await.unwrap_err().is_not_found());
    }
}
