//! In-memory orchestrator, optionally backed by a manifest file.
//!
//! With a manifest file, every `list_endpoints` call re-reads it so edits show
//! up on the next pass. Status writes are kept in memory as the per-kind status
//! documents an orchestrator would store.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

use super::manifest::{EndpointDefaults, ManifestFile};
use super::OrchestratorClient;
use crate::domain::{ConfigResource, Endpoint, EndpointId};
use crate::errors::{ControllerError, Result};

#[derive(Debug, Default)]
pub struct MemoryOrchestrator {
    manifest: Option<(PathBuf, EndpointDefaults)>,
    endpoints: RwLock<BTreeMap<EndpointId, Endpoint>>,
    statuses: RwLock<BTreeMap<EndpointId, serde_json::Value>>,
    config_resources: RwLock<BTreeMap<(String, String), ConfigResource>>,
    failures: RwLock<BTreeSet<String>>,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orchestrator reading endpoints and config resources from a manifest file
    pub fn from_file(path: impl Into<PathBuf>, defaults: EndpointDefaults) -> Self {
        Self { manifest: Some((path.into(), defaults)), ..Self::default() }
    }

    pub async fn upsert_endpoint(&self, endpoint: Endpoint) {
        self.endpoints.write().await.insert(endpoint.id.clone(), endpoint);
    }

    pub async fn remove_endpoint(&self, id: &EndpointId) {
        self.endpoints.write().await.remove(id);
    }

    pub async fn put_config_resource(&self, resource: ConfigResource) {
        let key = (resource.namespace.clone(), resource.name.clone());
        self.config_resources.write().await.insert(key, resource);
    }

    /// Make every later call of `operation` fail until cleared
    pub async fn inject_failure(&self, operation: &str) {
        self.failures.write().await.insert(operation.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Address currently reported for an endpoint
    pub async fn reported_address(&self, id: &EndpointId) -> Option<String> {
        self.statuses.read().await.get(id).and_then(|status| id.kind.reported_address(status))
    }

    /// Raw status document written for an endpoint
    pub async fn status(&self, id: &EndpointId) -> Option<serde_json::Value> {
        self.statuses.read().await.get(id).cloned()
    }

    async fn check_failure(&self, operation: &str) -> Result<()> {
        if self.failures.read().await.contains(operation) {
            return Err(ControllerError::orchestrator(format!("{} failed (injected)", operation)));
        }
        Ok(())
    }

    async fn reload_manifest(&self) -> Result<()> {
        let Some((path, defaults)) = &self.manifest else {
            return Ok(());
        };

        let manifest = ManifestFile::load(path).await?;
        let endpoints: BTreeMap<EndpointId, Endpoint> = manifest
            .endpoints
            .into_iter()
            .map(|m| m.into_endpoint(defaults))
            .map(|e| (e.id.clone(), e))
            .collect();
        debug!(path = %path.display(), endpoints = endpoints.len(), "Reloaded endpoint manifest");
        *self.endpoints.write().await = endpoints;

        let mut resources = self.config_resources.write().await;
        resources.clear();
        for resource in manifest.config_resources {
            resources.insert((resource.namespace.clone(), resource.name.clone()), resource);
        }
        Ok(())
    }
}

#[async_trait]
impl OrchestratorClient for MemoryOrchestrator {
    async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.check_failure("list_endpoints").await?;
        self.reload_manifest().await?;

        let statuses = self.statuses.read().await;
        let endpoints = self
            .endpoints
            .read()
            .await
            .values()
            .cloned()
            .map(|mut endpoint| {
                endpoint.status_address = statuses
                    .get(&endpoint.id)
                    .and_then(|status| endpoint.id.kind.reported_address(status));
                endpoint
            })
            .collect();
        Ok(endpoints)
    }

    async fn update_endpoint_status(&self, endpoint: &Endpoint, address: &str) -> Result<()> {
        self.check_failure("update_endpoint_status").await?;

        if !self.endpoints.read().await.contains_key(&endpoint.id) {
            return Err(ControllerError::not_found("endpoint", endpoint.id.to_string()));
        }

        let mut statuses = self.statuses.write().await;
        let current = statuses.get(&endpoint.id).and_then(|s| endpoint.id.kind.reported_address(s));
        if current.as_deref() == Some(address) {
            return Err(ControllerError::no_update_needed(endpoint.id.to_string()));
        }
        statuses.insert(endpoint.id.clone(), endpoint.id.kind.status_patch(address));
        Ok(())
    }

    async fn get_config_resource(&self, namespace: &str, name: &str) -> Result<ConfigResource> {
        self.check_failure("get_config_resource").await?;
        self.config_resources
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ControllerError::not_found("config resource", format!("{}/{}", namespace, name)))
    }
}
