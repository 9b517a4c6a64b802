//! Endpoint manifest file read by the file-backed orchestrator.
//!
//! The manifest mirrors what an orchestrator would carry in resource specs and
//! annotations: most settings are optional and fall back to controller
//! defaults when the endpoint is built.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::config::{is_known_ssl_policy, ControllerConfig};
use crate::domain::{
    CertificateId, ConfigResource, Endpoint, EndpointId, EndpointKind, IpAddressType,
    LoadBalancerType, Scheme,
};
use crate::errors::{ControllerError, Result};

/// Settings applied to endpoints that leave them unspecified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDefaults {
    pub load_balancer_type: LoadBalancerType,
    pub ip_address_type: IpAddressType,
    pub cluster_local_domain: String,
}

impl Default for EndpointDefaults {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for EndpointDefaults {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            load_balancer_type: config.default_load_balancer_type,
            ip_address_type: config.default_ip_address_type,
            cluster_local_domain: config.cluster_local_domain.clone(),
        }
    }
}

/// Top-level manifest document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    #[serde(default)]
    pub endpoints: Vec<EndpointManifest>,
    #[serde(default)]
    pub config_resources: Vec<ConfigResource>,
}

impl ManifestFile {
    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| ControllerError::from(e).with_context("endpoint manifest"))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ControllerError::from(e).with_context(format!("read {}", path.display())))?;
        Self::parse(&contents)
    }
}

/// One declared endpoint as written in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointManifest {
    #[serde(default = "default_kind")]
    pub kind: EndpointKind,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub certificate_arn: Option<String>,
    #[serde(default)]
    pub scheme: Option<Scheme>,
    #[serde(default)]
    pub shared: Option<bool>,
    #[serde(default)]
    pub ssl_policy: Option<String>,
    #[serde(default)]
    pub security_group: Option<String>,
    #[serde(default)]
    pub load_balancer_type: Option<LoadBalancerType>,
    #[serde(default)]
    pub ip_address_type: Option<IpAddressType>,
    #[serde(default)]
    pub http2: Option<bool>,
    #[serde(default)]
    pub waf_web_acl_id: Option<String>,
    #[serde(default)]
    pub skip_dns_rewrite: Option<bool>,
}

fn default_kind() -> EndpointKind {
    EndpointKind::Ingress
}

impl EndpointManifest {
    /// Build the endpoint, filling gaps from `defaults`.
    ///
    /// An unknown SSL policy is dropped with a warning and the endpoint runs on
    /// the default policy. Endpoints whose hostnames are all cluster-local skip
    /// the status rewrite unless told otherwise.
    pub fn into_endpoint(self, defaults: &EndpointDefaults) -> Endpoint {
        let id = EndpointId::new(self.kind, self.namespace, self.name);

        let ssl_policy = match self.ssl_policy {
            Some(policy) if !is_known_ssl_policy(&policy) => {
                warn!(endpoint = %id, ssl_policy = %policy, "Ignoring unknown SSL policy");
                None
            }
            other => other,
        };

        let cluster_local = !self.hostnames.is_empty()
            && !defaults.cluster_local_domain.is_empty()
            && self.hostnames.iter().all(|h| h.ends_with(&defaults.cluster_local_domain));

        let mut endpoint = Endpoint::new(id, self.hostnames);
        endpoint.certificate_id = self.certificate_arn.filter(|arn| !arn.is_empty()).map(CertificateId::from);
        endpoint.scheme = self.scheme.unwrap_or_default();
        endpoint.shared = self.shared.unwrap_or(true);
        endpoint.ssl_policy = ssl_policy;
        endpoint.security_group = self.security_group.unwrap_or_default();
        endpoint.load_balancer_type = self.load_balancer_type.unwrap_or(defaults.load_balancer_type);
        endpoint.ip_address_type = self.ip_address_type.unwrap_or(defaults.ip_address_type);
        endpoint.http2 = self.http2.unwrap_or(true);
        endpoint.waf_web_acl_id = self.waf_web_acl_id.filter(|waf| !waf.is_empty());
        endpoint.skip_dns_rewrite = self.skip_dns_rewrite.unwrap_or(cluster_local);
        endpoint
    }
}
