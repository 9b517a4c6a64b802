//! Endpoint domain types
//!
//! An endpoint is an orchestrator-declared desire for a reachable hostname set.
//! Several resource kinds declare endpoints; the reconciliation engine only sees
//! the common [`Endpoint`] shape and asks the kind for its status patch.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use super::id::{string_enum, CertificateId};

string_enum!(
    /// Resource kind that declared an endpoint
    EndpointKind {
        /// Plain ingress resource
        Ingress => "ingress",
        /// Route group resource
        RouteGroup => "routegroup",
        /// Fabric gateway resource
        FabricGateway => "fabricgateway",
    }
);

impl EndpointKind {
    /// Build the status patch that reports `address` for this kind.
    pub fn status_patch(&self, address: &str) -> serde_json::Value {
        match self {
            EndpointKind::Ingress => json!({
                "status": { "loadBalancer": { "ingress": [ { "hostname": address } ] } }
            }),
            EndpointKind::RouteGroup => json!({
                "status": { "loadBalancer": { "routeGroup": [ { "hostname": address } ] } }
            }),
            EndpointKind::FabricGateway => json!({
                "status": { "loadBalancer": { "hostname": address } }
            }),
        }
    }

    /// Read the reported address back out of a status document produced by
    /// [`EndpointKind::status_patch`].
    pub fn reported_address(&self, status: &serde_json::Value) -> Option<String> {
        let lb = status.get("status")?.get("loadBalancer")?;
        let hostname = match self {
            EndpointKind::Ingress => lb.get("ingress")?.get(0)?.get("hostname"),
            EndpointKind::RouteGroup => lb.get("routeGroup")?.get(0)?.get("hostname"),
            EndpointKind::FabricGateway => lb.get("hostname"),
        };
        hostname.and_then(|h| h.as_str()).map(str::to_string)
    }
}

string_enum!(
    /// Whether a load balancer is reachable from the internet
    #[derive(Default)]
    Scheme {
        #[default]
        InternetFacing => "internet-facing",
        Internal => "internal",
    }
);

string_enum!(
    /// Load balancer flavour
    #[derive(Default)]
    LoadBalancerType {
        #[default]
        Application => "application",
        Network => "network",
    }
);

string_enum!(
    /// IP address family served by a load balancer
    #[derive(Default)]
    IpAddressType {
        #[default]
        Ipv4 => "ipv4",
        Dualstack => "dualstack",
    }
);

/// Identity of an endpoint: kind, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId {
    pub kind: EndpointKind,
    pub namespace: String,
    pub name: String,
}

impl EndpointId {
    pub fn new(kind: EndpointKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }

    /// Shorthand for an ingress identity
    pub fn ingress(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(EndpointKind::Ingress, namespace, name)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl FromStr for EndpointId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(namespace), Some(name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(kind.parse()?, namespace, name))
            }
            _ => Err(format!("Invalid endpoint identity: {}", s)),
        }
    }
}

/// Orchestrator-declared intent for one ingress endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: EndpointId,

    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Pre-assigned certificate; skips certificate resolution when set
    #[serde(default)]
    pub certificate_id: Option<CertificateId>,

    #[serde(default)]
    pub scheme: Scheme,

    #[serde(default = "default_shared")]
    pub shared: bool,

    /// Explicitly requested SSL policy. `None` means the endpoint takes the
    /// configured default and may join a load balancer with any policy.
    #[serde(default)]
    pub ssl_policy: Option<String>,

    #[serde(default)]
    pub security_group: String,

    #[serde(default)]
    pub load_balancer_type: LoadBalancerType,

    #[serde(default)]
    pub ip_address_type: IpAddressType,

    #[serde(default = "default_http2")]
    pub http2: bool,

    #[serde(default)]
    pub waf_web_acl_id: Option<String>,

    /// Never rewrite this endpoint's reported address (cluster-local hosts)
    #[serde(default)]
    pub skip_dns_rewrite: bool,

    /// Address currently reported in the endpoint's status
    #[serde(default)]
    pub status_address: Option<String>,
}

fn default_shared() -> bool {
    true
}

fn default_http2() -> bool {
    true
}

impl Endpoint {
    /// Create an endpoint with default load-balancer settings.
    pub fn new(id: EndpointId, hostnames: Vec<String>) -> Self {
        Self {
            id,
            hostnames,
            certificate_id: None,
            scheme: Scheme::default(),
            shared: default_shared(),
            ssl_policy: None,
            security_group: String::new(),
            load_balancer_type: LoadBalancerType::default(),
            ip_address_type: IpAddressType::default(),
            http2: default_http2(),
            waf_web_acl_id: None,
            skip_dns_rewrite: false,
            status_address: None,
        }
    }

    /// Whether the SSL policy was explicitly requested rather than defaulted
    pub fn has_ssl_policy_annotation(&self) -> bool {
        self.ssl_policy.is_some()
    }

    /// The SSL policy this endpoint runs with
    pub fn effective_ssl_policy<'a>(&'a self, default: &'a str) -> &'a str {
        self.ssl_policy.as_deref().unwrap_or(default)
    }

    /// Hostnames that need a certificate, excluding cluster-local ones
    pub fn certificate_hostnames<'a>(
        &'a self,
        cluster_local_domain: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.hostnames
            .iter()
            .map(String::as_str)
            .filter(move |h| cluster_local_domain.is_empty() || !h.ends_with(cluster_local_domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_id_string_roundtrip() {
        let id = EndpointId::new(EndpointKind::RouteGroup, "default", "foo");
        assert_eq!(id.to_string(), "routegroup/default/foo");

        let parsed: EndpointId = "routegroup/default/foo".parse().unwrap();
        assert_eq!(parsed, id);

        assert!("ingress/default".parse::<EndpointId>().is_err());
        assert!("service/default/foo".parse::<EndpointId>().is_err());
    }

    #[test]
    fn status_patch_shape_depends_on_kind() {
        let address = "kube-ing-1.eu-central-1.elb.amazonaws.com";
        for kind in [EndpointKind::Ingress, EndpointKind::RouteGroup, EndpointKind::FabricGateway] {
            let patch = kind.status_patch(address);
            assert_eq!(kind.reported_address(&patch).as_deref(), Some(address));
        }

        let ingress = EndpointKind::Ingress.status_patch(address);
        assert_eq!(ingress["status"]["loadBalancer"]["ingress"][0]["hostname"], address);
        let fabric = EndpointKind::FabricGateway.status_patch(address);
        assert_eq!(fabric["status"]["loadBalancer"]["hostname"], address);
    }

    #[test]
    fn attribute_defaults() {
        assert_eq!(Scheme::default(), Scheme::InternetFacing);
        assert_eq!(LoadBalancerType::default().as_str(), "application");
        assert_eq!(IpAddressType::default(), IpAddressType::Ipv4);
        assert_eq!("dualstack".parse::<IpAddressType>().unwrap(), IpAddressType::Dualstack);
    }

    #[test]
    fn ssl_policy_annotation() {
        let mut endpoint = Endpoint::new(EndpointId::ingress("default", "foo"), vec![]);
        assert!(!endpoint.has_ssl_policy_annotation());
        assert_eq!(endpoint.effective_ssl_policy("ELBSecurityPolicy-2016-08"), "ELBSecurityPolicy-2016-08");

        endpoint.ssl_policy = Some("ELBSecurityPolicy-TLS-1-2-2017-01".to_string());
        assert!(endpoint.has_ssl_policy_annotation());
        assert_eq!(
            endpoint.effective_ssl_policy("ELBSecurityPolicy-2016-08"),
            "ELBSecurityPolicy-TLS-1-2-2017-01"
        );
    }

    #[test]
    fn cluster_local_hostnames_are_not_resolved() {
        let endpoint = Endpoint::new(
            EndpointId::ingress("default", "foo"),
            vec!["foo.example.org".to_string(), "foo.default.svc.cluster.local".to_string()],
        );
        let hosts: Vec<&str> = endpoint.certificate_hostnames(".cluster.local").collect();
        assert_eq!(hosts, vec!["foo.example.org"]);
    }

    #[test]
    fn endpoint_yaml_defaults() {
        let yaml = r#"
id:
  kind: ingress
  namespace: default
  name: foo
hostnames: [a.example.org]
"#;
        let endpoint: Endpoint = serde_yaml::from_str(yaml).unwrap();
        assert!(endpoint.shared);
        assert!(endpoint.http2);
        assert_eq!(endpoint.scheme, Scheme::InternetFacing);
        assert_eq!(endpoint.load_balancer_type, LoadBalancerType::Application);
        assert!(endpoint.certificate_id.is_none());
    }

    #[test]
    fn scheme_parses_wire_names() {
        assert_eq!("internal".parse::<Scheme>().unwrap(), Scheme::Internal);
        assert_eq!(Scheme::InternetFacing.to_string(), "internet-facing");
        assert!("public".parse::<Scheme>().is_err());
    }
}
