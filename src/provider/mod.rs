//! # Collaborators
//!
//! The reconciliation engine talks to two external systems: the orchestrator
//! that declares endpoints, and the cloud provider that provisions stacks.
//! Both sit behind traits so SDK-backed clients and the in-memory
//! implementations shipped here are interchangeable.

pub mod manifest;
pub mod memory_cloud;
pub mod memory_orchestrator;

pub use manifest::{EndpointDefaults, EndpointManifest, ManifestFile};
pub use memory_cloud::MemoryCloud;
pub use memory_orchestrator::MemoryOrchestrator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ConfigResource, Endpoint, InstanceId, Stack, StackName, StackSpec};
use crate::errors::Result;

/// Orchestrator API as seen by the controller.
#[async_trait]
pub trait OrchestratorClient: Send + Sync + std::fmt::Debug {
    /// All endpoints currently declared
    async fn list_endpoints(&self) -> Result<Vec<Endpoint>>;

    /// Report `address` in the endpoint's status.
    ///
    /// Fails with `ControllerError::NoUpdateNeeded` when the status already
    /// carries the address.
    async fn update_endpoint_status(&self, endpoint: &Endpoint, address: &str) -> Result<()>;

    /// Fetch a configuration resource; `ControllerError::NotFound` if absent
    async fn get_config_resource(&self, namespace: &str, name: &str) -> Result<ConfigResource>;
}

/// Cloud provisioning API as seen by the controller.
#[async_trait]
pub trait CloudProvisioner: Send + Sync + std::fmt::Debug {
    /// Stacks carrying the ownership tag of `cluster_id`
    async fn list_tagged_stacks(&self, cluster_id: &str) -> Result<Vec<Stack>>;

    async fn create_stack(&self, spec: &StackSpec) -> Result<StackName>;

    async fn update_stack(&self, spec: &StackSpec) -> Result<()>;

    /// Record the stack-level deletion time (a tag write, no teardown)
    async fn schedule_stack_deletion(&self, name: &StackName, at: DateTime<Utc>) -> Result<()>;

    async fn delete_stack(&self, name: &StackName) -> Result<()>;

    /// Running compute instances that belong to `cluster_id`
    async fn list_cluster_instances(&self, cluster_id: &str) -> Result<Vec<InstanceId>>;

    /// Instances currently registered with a stack's routing target
    async fn list_registered_targets(&self, target_group: &str) -> Result<Vec<InstanceId>>;

    async fn register_targets(&self, target_group: &str, instances: &[InstanceId]) -> Result<()>;

    async fn deregister_targets(&self, target_group: &str, instances: &[InstanceId]) -> Result<()>;
}
