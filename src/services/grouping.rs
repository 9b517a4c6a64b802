//! Load-balancer grouping engine
//!
//! Places endpoints onto load-balancer descriptors. Existing stacks are seeded
//! first so endpoints keep landing on the load balancer already serving them;
//! new descriptors are only started when nothing compatible has room left.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::report::Problem;
use crate::domain::{
    AlarmSet, CertificateId, CompatibilityKey, Endpoint, LoadBalancerDescriptor, ObservedStack, Stack,
};
use crate::errors::ControllerError;

/// An endpoint together with the certificates resolved for its hostnames.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEndpoint {
    pub endpoint: Endpoint,
    pub certificates: BTreeSet<CertificateId>,
}

impl ResolvedEndpoint {
    pub fn new(endpoint: Endpoint, certificates: BTreeSet<CertificateId>) -> Self {
        Self { endpoint, certificates }
    }
}

/// Result of grouping: every descriptor, seeded or new, plus skipped items.
#[derive(Debug, Default)]
pub struct Grouping {
    pub descriptors: Vec<LoadBalancerDescriptor>,
    pub problems: Vec<Problem>,
}

impl Grouping {
    /// Descriptors with at least one endpoint
    pub fn desired(&self) -> impl Iterator<Item = &LoadBalancerDescriptor> {
        self.descriptors.iter().filter(|d| d.has_endpoints())
    }

    /// Existing stacks no endpoint was placed on
    pub fn orphaned(&self) -> impl Iterator<Item = &ObservedStack> {
        self.descriptors.iter().filter(|d| !d.has_endpoints()).filter_map(|d| d.existing.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct GroupingEngine {
    max_certificates: usize,
    default_ssl_policy: String,
}

impl GroupingEngine {
    pub fn new(max_certificates: usize, default_ssl_policy: impl Into<String>) -> Self {
        Self { max_certificates, default_ssl_policy: default_ssl_policy.into() }
    }

    /// Group `endpoints` onto the load balancers in `stacks`, starting new ones
    /// where needed. Output order only depends on the input sets.
    pub fn group(
        &self,
        stacks: &[Stack],
        endpoints: &[ResolvedEndpoint],
        alarms: Option<&AlarmSet>,
        now: DateTime<Utc>,
    ) -> Grouping {
        let mut grouping = Grouping::default();

        let mut observed: Vec<ObservedStack> = Vec::with_capacity(stacks.len());
        for stack in stacks {
            match ObservedStack::decode(stack.clone()) {
                Ok(stack) => observed.push(stack),
                Err(e) => {
                    warn!(stack = %stack.name, error = %e, "Skipping stack with unreadable tags");
                    grouping.problems.push(Problem::new(format!("stack {}", stack.name), e));
                }
            }
        }
        observed.sort_by(|a, b| a.name().cmp(b.name()));
        grouping.descriptors =
            observed.into_iter().map(|stack| LoadBalancerDescriptor::from_stack(stack, alarms.cloned())).collect();

        let mut ordered: Vec<&ResolvedEndpoint> = endpoints.iter().collect();
        ordered.sort_by(|a, b| a.endpoint.id.cmp(&b.endpoint.id));

        for resolved in ordered {
            if let Err(e) = self.place(&mut grouping.descriptors, resolved, alarms, now) {
                warn!(endpoint = %resolved.endpoint.id, error = %e, "Endpoint not placed");
                grouping.problems.push(Problem::new(format!("endpoint {}", resolved.endpoint.id), e));
            }
        }

        grouping
    }

    fn place(
        &self,
        descriptors: &mut Vec<LoadBalancerDescriptor>,
        resolved: &ResolvedEndpoint,
        alarms: Option<&AlarmSet>,
        now: DateTime<Utc>,
    ) -> Result<(), ControllerError> {
        let ResolvedEndpoint { endpoint, certificates } = resolved;

        if certificates.is_empty() {
            return Err(ControllerError::validation_field("endpoint has no certificate", "hostnames"));
        }
        if certificates.len() > self.max_certificates {
            return Err(ControllerError::validation_field(
                format!(
                    "endpoint needs {} certificates, a load balancer holds at most {}",
                    certificates.len(),
                    self.max_certificates
                ),
                "hostnames",
            ));
        }

        let max_certificates = self.max_certificates;
        let mut candidates =
            descriptors.iter_mut().filter(|d| d.accepts(endpoint, certificates, max_certificates, now));
        let first = candidates.next();

        let target = match first {
            Some(first) if first.holds_any(certificates, now) => Some(first),
            Some(first) => Some(candidates.find(|d| d.holds_any(certificates, now)).unwrap_or(first)),
            None => None,
        };

        match target {
            Some(descriptor) => {
                debug!(endpoint = %endpoint.id, stack = ?descriptor.stack_name(), "Placed endpoint");
                descriptor.add_endpoint(endpoint, certificates);
            }
            None => {
                let key = CompatibilityKey::for_endpoint(endpoint, &self.default_ssl_policy);
                let mut descriptor = if endpoint.shared {
                    LoadBalancerDescriptor::shared(key, alarms.cloned())
                } else {
                    LoadBalancerDescriptor::dedicated(key, endpoint.id.clone(), alarms.cloned())
                };
                debug!(endpoint = %endpoint.id, shared = endpoint.shared, "Started new load balancer");
                descriptor.add_endpoint(endpoint, certificates);
                descriptors.push(descriptor);
            }
        }
        Ok(())
    }
}
