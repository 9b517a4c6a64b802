//! Desired load-balancer state
//!
//! A [`LoadBalancerDescriptor`] is rebuilt from scratch on every pass. It either
//! starts empty (a load balancer that does not exist yet) or is seeded from an
//! [`ObservedStack`] so endpoints keep landing on the stack that already serves
//! them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::alarm::AlarmSet;
use super::endpoint::{Endpoint, EndpointId, IpAddressType, LoadBalancerType, Scheme};
use super::id::{CertificateId, StackName};
use super::stack::{CertificateSchedule, Stack, StackTags};
use crate::errors::{ControllerError, Result};

/// Attributes two endpoints must agree on to share a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityKey {
    pub scheme: Scheme,
    pub security_group: String,
    pub ssl_policy: String,
    pub load_balancer_type: LoadBalancerType,
    pub ip_address_type: IpAddressType,
    pub http2: bool,
    pub waf_web_acl_id: Option<String>,
}

impl CompatibilityKey {
    /// Key of a fresh load balancer started for `endpoint`
    pub fn for_endpoint(endpoint: &Endpoint, default_ssl_policy: &str) -> Self {
        Self {
            scheme: endpoint.scheme,
            security_group: endpoint.security_group.clone(),
            ssl_policy: endpoint.effective_ssl_policy(default_ssl_policy).to_string(),
            load_balancer_type: endpoint.load_balancer_type,
            ip_address_type: endpoint.ip_address_type,
            http2: endpoint.http2,
            waf_web_acl_id: endpoint.waf_web_acl_id.clone(),
        }
    }

    /// Whether `endpoint` can run behind a load balancer with this key.
    ///
    /// The SSL policy only has to match when the endpoint requested one
    /// explicitly; endpoints on the default policy inherit whatever the load
    /// balancer already uses.
    pub fn admits(&self, endpoint: &Endpoint) -> bool {
        if let Some(policy) = &endpoint.ssl_policy {
            if *policy != self.ssl_policy {
                return false;
            }
        }
        self.scheme == endpoint.scheme
            && self.security_group == endpoint.security_group
            && self.load_balancer_type == endpoint.load_balancer_type
            && self.ip_address_type == endpoint.ip_address_type
            && self.http2 == endpoint.http2
            && self.waf_web_acl_id == endpoint.waf_web_acl_id
    }
}

/// An existing stack with its tags decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedStack {
    pub stack: Stack,
    pub key: CompatibilityKey,
    pub shared: bool,
    pub owner: Option<EndpointId>,
    pub certificates: CertificateSchedule,
    pub deletion_scheduled_at: Option<DateTime<Utc>>,
}

impl ObservedStack {
    /// Decode the tag bag of `stack`. Fails on malformed or inconsistent tags.
    pub fn decode(stack: Stack) -> Result<Self> {
        let key = stack.tags.compatibility()?;
        let shared = stack.tags.shared()?;
        let owner = stack.tags.owner()?;
        if !shared && owner.is_none() {
            return Err(ControllerError::invalid_tag(
                super::stack::OWNER_TAG,
                "",
                "dedicated stack has no owner",
            ));
        }
        let certificates = stack.tags.certificates()?;
        let deletion_scheduled_at = stack.tags.deletion_scheduled_at()?;
        Ok(Self { stack, key, shared, owner, certificates, deletion_scheduled_at })
    }

    pub fn name(&self) -> &StackName {
        &self.stack.name
    }

    pub fn alarm_config_hash(&self) -> Option<&str> {
        self.stack.tags.alarm_config_hash()
    }

    /// Whether some certificate on the stack is scheduled for removal after `now`
    pub fn has_pending_certificates(&self, now: DateTime<Utc>) -> bool {
        self.certificates.values().any(|at| matches!(at, Some(at) if *at > now))
    }

    /// Whether endpoints may still be placed on the stack. Failed and deleting
    /// stacks are left to orphan cleanup.
    pub fn is_placeable(&self) -> bool {
        let status = self.stack.status;
        !(status.is_failed() || status.is_deleting())
    }

    /// Certificates still attached at `now`
    fn live_certificates(&self, now: DateTime<Utc>) -> impl Iterator<Item = &CertificateId> {
        self.certificates
            .iter()
            .filter(move |(_, at)| at.map_or(true, |at| at > now))
            .map(|(id, _)| id)
    }
}

/// Desired state of one load balancer for the current pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancerDescriptor {
    pub key: CompatibilityKey,
    pub shared: bool,
    /// Set only for dedicated load balancers
    pub owner: Option<EndpointId>,
    /// Certificate to the endpoints using it; every entry has at least one endpoint
    pub certificates: BTreeMap<CertificateId, Vec<Endpoint>>,
    /// `None` when the alarm configuration could not be read this pass
    pub alarms: Option<AlarmSet>,
    pub existing: Option<ObservedStack>,
}

impl LoadBalancerDescriptor {
    /// Empty shared load balancer
    pub fn shared(key: CompatibilityKey, alarms: Option<AlarmSet>) -> Self {
        Self { key, shared: true, owner: None, certificates: BTreeMap::new(), alarms, existing: None }
    }

    /// Empty load balancer dedicated to `owner`
    pub fn dedicated(key: CompatibilityKey, owner: EndpointId, alarms: Option<AlarmSet>) -> Self {
        Self {
            key,
            shared: false,
            owner: Some(owner),
            certificates: BTreeMap::new(),
            alarms,
            existing: None,
        }
    }

    /// Descriptor for an existing stack, before any endpoint is placed on it
    pub fn from_stack(observed: ObservedStack, alarms: Option<AlarmSet>) -> Self {
        Self {
            key: observed.key.clone(),
            shared: observed.shared,
            owner: observed.owner.clone(),
            certificates: BTreeMap::new(),
            alarms,
            existing: Some(observed),
        }
    }

    pub fn stack_name(&self) -> Option<&StackName> {
        self.existing.as_ref().map(ObservedStack::name)
    }

    pub fn has_endpoints(&self) -> bool {
        !self.certificates.is_empty()
    }

    /// Distinct endpoints placed on this load balancer, ordered by identity
    pub fn endpoints(&self) -> Vec<&Endpoint> {
        let mut unique: BTreeMap<&EndpointId, &Endpoint> = BTreeMap::new();
        for endpoint in self.certificates.values().flatten() {
            unique.entry(&endpoint.id).or_insert(endpoint);
        }
        unique.into_values().collect()
    }

    /// Whether one of `certificates` is placed here or still attached to the
    /// existing stack at `now`
    pub fn holds_any(&self, certificates: &BTreeSet<CertificateId>, now: DateTime<Utc>) -> bool {
        let occupied = self.occupied_certificates(now);
        certificates.iter().any(|id| occupied.contains(id))
    }

    /// Certificates occupying a listener slot: the referenced ones plus those
    /// the existing stack keeps until their removal time.
    fn occupied_certificates(&self, now: DateTime<Utc>) -> BTreeSet<&CertificateId> {
        let mut occupied: BTreeSet<&CertificateId> = self.certificates.keys().collect();
        if let Some(existing) = &self.existing {
            occupied.extend(existing.live_certificates(now));
        }
        occupied
    }

    pub fn certificate_count(&self, now: DateTime<Utc>) -> usize {
        self.occupied_certificates(now).len()
    }

    /// Whether `endpoint`, serving `certificates`, may be placed here without
    /// exceeding `max_certificates`.
    pub fn accepts(
        &self,
        endpoint: &Endpoint,
        certificates: &BTreeSet<CertificateId>,
        max_certificates: usize,
        now: DateTime<Utc>,
    ) -> bool {
        let membership = if endpoint.shared {
            self.shared
        } else {
            !self.shared && self.owner.as_ref() == Some(&endpoint.id)
        };
        if !membership || !self.key.admits(endpoint) {
            return false;
        }
        if self.existing.as_ref().is_some_and(|existing| !existing.is_placeable()) {
            return false;
        }

        let mut occupied = self.occupied_certificates(now);
        occupied.extend(certificates.iter());
        occupied.len() <= max_certificates
    }

    pub fn add_endpoint(&mut self, endpoint: &Endpoint, certificates: &BTreeSet<CertificateId>) {
        for id in certificates {
            self.certificates.entry(id.clone()).or_default().push(endpoint.clone());
        }
    }

    /// Desired certificate schedule.
    ///
    /// Referenced certificates are kept indefinitely. Certificates the existing
    /// stack carries but nothing references any more keep their removal time,
    /// or get `now + grace` if they had none. Elapsed entries are dropped.
    pub fn desired_certificates(&self, now: DateTime<Utc>, grace: Duration) -> CertificateSchedule {
        let mut schedule: CertificateSchedule =
            self.certificates.keys().map(|id| (id.clone(), None)).collect();

        if let Some(existing) = &self.existing {
            for (id, at) in &existing.certificates {
                if schedule.contains_key(id) {
                    continue;
                }
                match at {
                    None => {
                        schedule.insert(id.clone(), Some(now + grace));
                    }
                    Some(at) if *at > now => {
                        schedule.insert(id.clone(), Some(*at));
                    }
                    Some(_) => {}
                }
            }
        }
        schedule
    }

    /// Alarm hash the stack should carry. Unknown alarm configuration keeps
    /// whatever the existing stack has.
    pub fn desired_alarm_hash(&self) -> Option<String> {
        match &self.alarms {
            Some(alarms) => alarms.hash(),
            None => self
                .existing
                .as_ref()
                .and_then(ObservedStack::alarm_config_hash)
                .map(str::to_string),
        }
    }

    /// Attributes on which the existing stack differs; empty means in sync.
    pub fn drift(&self, now: DateTime<Utc>, grace: Duration) -> Vec<&'static str> {
        let Some(existing) = &self.existing else {
            return vec!["stack"];
        };

        let mut drift = Vec::new();
        if existing.key != self.key {
            drift.push("compatibility");
        }
        if existing.shared != self.shared || existing.owner != self.owner {
            drift.push("ownership");
        }
        if existing.certificates != self.desired_certificates(now, grace) {
            drift.push("certificates");
        }
        if self.alarms.is_some() && self.desired_alarm_hash().as_deref() != existing.alarm_config_hash() {
            drift.push("alarms");
        }
        if existing.deletion_scheduled_at.is_some() {
            drift.push("deletion_schedule");
        }
        drift
    }

    /// Build the create/update request for this descriptor.
    pub fn to_stack_spec(
        &self,
        name: StackName,
        cluster_id: &str,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> StackSpec {
        let schedule = self.desired_certificates(now, grace);

        let mut tags = StackTags::owned_by(cluster_id);
        tags.set_compatibility(&self.key);
        tags.set_shared(self.shared);
        tags.set_owner(self.owner.as_ref());
        tags.set_certificates(&schedule);
        tags.set_alarm_config_hash(self.desired_alarm_hash().as_deref());

        StackSpec {
            name,
            key: self.key.clone(),
            certificates: schedule.into_keys().collect(),
            alarms: self.alarms.clone(),
            tags,
        }
    }
}

/// Input to the cloud provisioner's create and update calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    pub name: StackName,
    pub key: CompatibilityKey,
    /// Certificates attached to the listener, including those pending removal
    pub certificates: Vec<CertificateId>,
    /// `None` leaves the stack's alarms untouched
    pub alarms: Option<AlarmSet>,
    pub tags: StackTags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EndpointKind, StackStatus};

    const POLICY: &str = "ELBSecurityPolicy-2016-08";

    fn endpoint(name: &str) -> Endpoint {
        Endpoint::new(EndpointId::ingress("default", name), vec![format!("{}.example.org", name)])
    }

    fn certs(ids: &[&str]) -> BTreeSet<CertificateId> {
        ids.iter().map(|id| CertificateId::from(*id)).collect()
    }

    /// Tags store second precision
    fn whole_seconds() -> DateTime<Utc> {
        DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
    }

    fn observed(schedule: CertificateSchedule, now: DateTime<Utc>) -> ObservedStack {
        let key = CompatibilityKey::for_endpoint(&endpoint("seed"), POLICY);
        let mut tags = StackTags::owned_by("cluster-a");
        tags.set_compatibility(&key);
        tags.set_shared(true);
        tags.set_certificates(&schedule);
        ObservedStack::decode(Stack {
            name: StackName::new("cluster-a-1"),
            status: StackStatus::CreateComplete,
            dns_name: Some("lb.example".to_string()),
            target_group: None,
            created_at: now - Duration::hours(1),
            tags,
        })
        .unwrap()
    }

    #[test]
    fn default_policy_endpoints_inherit_policy() {
        let mut key = CompatibilityKey::for_endpoint(&endpoint("a"), POLICY);
        key.ssl_policy = "ELBSecurityPolicy-TLS-1-2-2017-01".to_string();

        let mut default_policy = endpoint("b");
        assert!(key.admits(&default_policy));

        default_policy.ssl_policy = Some(POLICY.to_string());
        assert!(!key.admits(&default_policy));

        default_policy.ssl_policy = Some("ELBSecurityPolicy-TLS-1-2-2017-01".to_string());
        assert!(key.admits(&default_policy));
    }

    #[test]
    fn any_other_attribute_must_match() {
        let key = CompatibilityKey::for_endpoint(&endpoint("a"), POLICY);
        let mut other = endpoint("b");
        other.scheme = Scheme::Internal;
        assert!(!key.admits(&other));

        let mut other = endpoint("b");
        other.waf_web_acl_id = Some("waf".to_string());
        assert!(!key.admits(&other));

        let mut other = endpoint("b");
        other.http2 = false;
        assert!(!key.admits(&other));
    }

    #[test]
    fn dedicated_descriptor_only_accepts_owner() {
        let now = whole_seconds();
        let mut foo = endpoint("foo");
        foo.shared = false;
        let mut bar = endpoint("bar");
        bar.shared = false;

        let key = CompatibilityKey::for_endpoint(&foo, POLICY);
        let descriptor = LoadBalancerDescriptor::dedicated(key, foo.id.clone(), None);
        assert!(descriptor.accepts(&foo, &certs(&["c1"]), 25, now));
        assert!(!descriptor.accepts(&bar, &certs(&["c1"]), 25, now));
        assert!(!descriptor.accepts(&endpoint("shared"), &certs(&["c1"]), 25, now));
    }

    #[test]
    fn certificate_limit_counts_distinct_certificates() {
        let now = whole_seconds();
        let key = CompatibilityKey::for_endpoint(&endpoint("a"), POLICY);
        let mut descriptor = LoadBalancerDescriptor::shared(key, None);
        descriptor.add_endpoint(&endpoint("a"), &certs(&["c1", "c2"]));

        assert!(descriptor.accepts(&endpoint("b"), &certs(&["c2"]), 2, now));
        assert!(!descriptor.accepts(&endpoint("b"), &certs(&["c3"]), 2, now));

        descriptor.add_endpoint(&endpoint("b"), &certs(&["c2"]));
        assert_eq!(descriptor.certificate_count(now), 2);
        assert_eq!(descriptor.endpoints().len(), 2);
        assert_eq!(descriptor.certificates[&CertificateId::from("c2")].len(), 2);
    }

    #[test]
    fn retained_certificates_occupy_slots() {
        let now = whole_seconds();
        let mut schedule = CertificateSchedule::new();
        schedule.insert(CertificateId::from("old"), Some(now + Duration::minutes(10)));
        schedule.insert(CertificateId::from("gone"), Some(now - Duration::minutes(10)));
        let descriptor = LoadBalancerDescriptor::from_stack(observed(schedule, now), None);

        assert_eq!(descriptor.certificate_count(now), 1);
        assert!(!descriptor.accepts(&endpoint("a"), &certs(&["new"]), 1, now));
        assert!(descriptor.accepts(&endpoint("a"), &certs(&["old"]), 1, now));
    }

    #[test]
    fn seeded_certificates_count_as_held() {
        let now = whole_seconds();
        let mut schedule = CertificateSchedule::new();
        schedule.insert(CertificateId::from("c1"), None);
        schedule.insert(CertificateId::from("gone"), Some(now - Duration::minutes(1)));
        let descriptor = LoadBalancerDescriptor::from_stack(observed(schedule, now), None);

        assert!(descriptor.holds_any(&certs(&["c1", "c9"]), now));
        assert!(!descriptor.holds_any(&certs(&["gone"]), now));
        assert!(!descriptor.holds_any(&certs(&["c2"]), now));
    }

    #[test]
    fn failed_stack_accepts_no_endpoints() {
        let now = whole_seconds();
        let mut stack = observed(CertificateSchedule::new(), now);
        stack.stack.status = StackStatus::CreateFailed;
        assert!(!stack.is_placeable());

        let descriptor = LoadBalancerDescriptor::from_stack(stack, None);
        assert!(!descriptor.accepts(&endpoint("a"), &certs(&["c1"]), 25, now));
    }

    #[test]
    fn desired_certificates_apply_grace_period() {
        let now = whole_seconds();
        let grace = Duration::hours(1);
        let later = now + Duration::minutes(30);

        let mut schedule = CertificateSchedule::new();
        schedule.insert(CertificateId::from("kept"), None);
        schedule.insert(CertificateId::from("unreferenced"), None);
        schedule.insert(CertificateId::from("pending"), Some(later));
        schedule.insert(CertificateId::from("elapsed"), Some(now - Duration::seconds(1)));

        let mut descriptor = LoadBalancerDescriptor::from_stack(observed(schedule, now), None);
        descriptor.add_endpoint(&endpoint("a"), &certs(&["kept", "added"]));

        let desired = descriptor.desired_certificates(now, grace);
        assert_eq!(desired[&CertificateId::from("kept")], None);
        assert_eq!(desired[&CertificateId::from("added")], None);
        assert_eq!(desired[&CertificateId::from("unreferenced")], Some(now + grace));
        assert_eq!(desired[&CertificateId::from("pending")], Some(later));
        assert!(!desired.contains_key(&CertificateId::from("elapsed")));
    }

    #[test]
    fn reclaimed_certificate_is_kept_indefinitely_again() {
        let now = whole_seconds();
        let mut schedule = CertificateSchedule::new();
        schedule.insert(CertificateId::from("c1"), Some(now + Duration::minutes(5)));

        let mut descriptor = LoadBalancerDescriptor::from_stack(observed(schedule, now), None);
        descriptor.add_endpoint(&endpoint("a"), &certs(&["c1"]));
        assert_eq!(descriptor.desired_certificates(now, Duration::hours(1))[&CertificateId::from("c1")], None);
        assert_eq!(descriptor.drift(now, Duration::hours(1)), vec!["certificates"]);
    }

    #[test]
    fn in_sync_stack_has_no_drift() {
        let now = whole_seconds();
        let mut schedule = CertificateSchedule::new();
        schedule.insert(CertificateId::from("c1"), None);

        let mut descriptor = LoadBalancerDescriptor::from_stack(observed(schedule, now), None);
        descriptor.add_endpoint(&endpoint("a"), &certs(&["c1"]));
        assert!(descriptor.drift(now, Duration::hours(1)).is_empty());

        // an empty alarm set matches a stack without alarm hash
        descriptor.alarms = Some(AlarmSet::default());
        assert!(descriptor.drift(now, Duration::hours(1)).is_empty());
    }

    #[test]
    fn deletion_schedule_counts_as_drift() {
        let now = whole_seconds();
        let mut schedule = CertificateSchedule::new();
        schedule.insert(CertificateId::from("c1"), None);
        let mut stack = observed(schedule, now);
        stack.deletion_scheduled_at = Some(now + Duration::minutes(10));

        let mut descriptor = LoadBalancerDescriptor::from_stack(stack, None);
        descriptor.add_endpoint(&endpoint("a"), &certs(&["c1"]));
        assert_eq!(descriptor.drift(now, Duration::hours(1)), vec!["deletion_schedule"]);
    }

    #[test]
    fn stack_spec_carries_tags() {
        let now = whole_seconds();
        let mut owner = endpoint("foo");
        owner.shared = false;
        owner.id = EndpointId::new(EndpointKind::FabricGateway, "default", "foo");
        let key = CompatibilityKey::for_endpoint(&owner, POLICY);
        let mut descriptor = LoadBalancerDescriptor::dedicated(key.clone(), owner.id.clone(), None);
        descriptor.add_endpoint(&owner, &certs(&["c1"]));

        let spec = descriptor.to_stack_spec(StackName::new("cluster-a-1"), "cluster-a", now, Duration::hours(1));
        assert_eq!(spec.certificates, vec![CertificateId::from("c1")]);
        assert_eq!(spec.tags.cluster_id(), Some("cluster-a"));
        assert_eq!(spec.tags.owner().unwrap(), Some(owner.id.clone()));
        assert!(!spec.tags.shared().unwrap());
        assert_eq!(spec.tags.compatibility().unwrap(), key);
        assert_eq!(spec.tags.deletion_scheduled_at().unwrap(), None);
    }

    #[test]
    fn dedicated_stack_without_owner_is_rejected() {
        let now = whole_seconds();
        let mut stack = observed(CertificateSchedule::new(), now).stack;
        stack.tags.set_shared(false);
        assert!(ObservedStack::decode(stack).is_err());
    }
}
