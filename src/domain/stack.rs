//! Provisioned load-balancer stacks and their tag-encoded state
//!
//! The controller keeps no database. Everything it needs to remember between
//! passes (ownership, certificate deletion schedule, compatibility attributes)
//! lives in provider-side tags on the stack. [`StackTags`] is the only place
//! that knows the tag names and encodings.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::descriptor::CompatibilityKey;
use super::endpoint::EndpointId;
use super::id::{string_enum, CertificateId, StackName};
use crate::errors::{ControllerError, Result};

pub const APPLICATION_TAG: &str = "kubernetes:application";
pub const APPLICATION_TAG_VALUE: &str = "albkeeper";
pub const CLUSTER_ID_TAG: &str = "ingress:cluster-id";
pub const OWNER_TAG: &str = "ingress:owner";
pub const CERTIFICATE_TAG_PREFIX: &str = "ingress:certificate-arn/";
pub const SCHEME_TAG: &str = "ingress:scheme";
pub const SECURITY_GROUP_TAG: &str = "ingress:security-group";
pub const SSL_POLICY_TAG: &str = "ingress:ssl-policy";
pub const LOAD_BALANCER_TYPE_TAG: &str = "ingress:load-balancer-type";
pub const IP_ADDRESS_TYPE_TAG: &str = "ingress:ip-address-type";
pub const HTTP2_TAG: &str = "ingress:http2";
pub const WAF_TAG: &str = "ingress:waf-web-acl-id";
pub const SHARED_TAG: &str = "ingress:shared";
pub const DELETION_SCHEDULED_TAG: &str = "ingress:deletion-scheduled-at";
pub const ALARM_HASH_TAG: &str = "cloudwatch:alarm-config-hash";

/// Encoding of the "keep indefinitely" certificate schedule entry.
const KEEP_INDEFINITELY: &str = "0001-01-01T00:00:00Z";

/// Certificate identifier to scheduled deletion time. `None` keeps the
/// certificate indefinitely because a live endpoint still references it.
pub type CertificateSchedule = BTreeMap<CertificateId, Option<DateTime<Utc>>>;

string_enum!(
    /// Provisioning state reported by the cloud provider
    StackStatus {
        CreateInProgress => "CREATE_IN_PROGRESS",
        CreateComplete => "CREATE_COMPLETE",
        CreateFailed => "CREATE_FAILED",
        RollbackInProgress => "ROLLBACK_IN_PROGRESS",
        RollbackComplete => "ROLLBACK_COMPLETE",
        RollbackFailed => "ROLLBACK_FAILED",
        UpdateInProgress => "UPDATE_IN_PROGRESS",
        UpdateComplete => "UPDATE_COMPLETE",
        UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
        UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
        DeleteInProgress => "DELETE_IN_PROGRESS",
        DeleteFailed => "DELETE_FAILED",
    }
);

impl StackStatus {
    /// Stable state where the stack serves traffic and accepts updates
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateComplete
                | StackStatus::UpdateComplete
                | StackStatus::UpdateRollbackComplete
        )
    }

    /// A provider operation is still running
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateInProgress
                | StackStatus::RollbackInProgress
                | StackStatus::UpdateInProgress
                | StackStatus::UpdateRollbackInProgress
        )
    }

    /// Terminal failure that needs an operator or a recreate
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateFailed
                | StackStatus::RollbackComplete
                | StackStatus::RollbackFailed
                | StackStatus::DeleteFailed
        )
    }

    pub fn is_deleting(&self) -> bool {
        matches!(self, StackStatus::DeleteInProgress)
    }
}

/// Key-value attribute bag on a stack with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackTags(BTreeMap<String, String>);

impl StackTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags every stack owned by `cluster_id` carries
    pub fn owned_by(cluster_id: &str) -> Self {
        let mut tags = Self::new();
        tags.insert(APPLICATION_TAG, APPLICATION_TAG_VALUE);
        tags.insert(CLUSTER_ID_TAG, cluster_id);
        tags
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.get(CLUSTER_ID_TAG)
    }

    /// Owning endpoint of a dedicated stack
    pub fn owner(&self) -> Result<Option<EndpointId>> {
        self.get(OWNER_TAG)
            .map(|value| {
                value
                    .parse::<EndpointId>()
                    .map_err(|reason| ControllerError::invalid_tag(OWNER_TAG, value, reason))
            })
            .transpose()
    }

    pub fn set_owner(&mut self, owner: Option<&EndpointId>) {
        match owner {
            Some(owner) => self.insert(OWNER_TAG, owner.to_string()),
            None => {
                self.remove(OWNER_TAG);
            }
        }
    }

    pub fn shared(&self) -> Result<bool> {
        match self.get(SHARED_TAG) {
            None => Ok(true),
            Some(value) => parse_bool(SHARED_TAG, value),
        }
    }

    pub fn set_shared(&mut self, shared: bool) {
        self.insert(SHARED_TAG, shared.to_string());
    }

    /// Decode the per-certificate deletion schedule
    pub fn certificates(&self) -> Result<CertificateSchedule> {
        let mut schedule = CertificateSchedule::new();
        for (key, value) in self.0.range(CERTIFICATE_TAG_PREFIX.to_string()..) {
            let Some(id) = key.strip_prefix(CERTIFICATE_TAG_PREFIX) else {
                break;
            };
            let at = if value == KEEP_INDEFINITELY { None } else { Some(parse_time(key, value)?) };
            schedule.insert(CertificateId::new(id), at);
        }
        Ok(schedule)
    }

    /// Replace the certificate schedule tags with `schedule`
    pub fn set_certificates(&mut self, schedule: &CertificateSchedule) {
        self.0.retain(|key, _| !key.starts_with(CERTIFICATE_TAG_PREFIX));
        for (id, at) in schedule {
            let value = match at {
                Some(at) => format_time(at),
                None => KEEP_INDEFINITELY.to_string(),
            };
            self.insert(format!("{}{}", CERTIFICATE_TAG_PREFIX, id), value);
        }
    }

    pub fn deletion_scheduled_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.get(DELETION_SCHEDULED_TAG).map(|value| parse_time(DELETION_SCHEDULED_TAG, value)).transpose()
    }

    pub fn set_deletion_scheduled_at(&mut self, at: Option<DateTime<Utc>>) {
        match at {
            Some(at) => self.insert(DELETION_SCHEDULED_TAG, format_time(&at)),
            None => {
                self.remove(DELETION_SCHEDULED_TAG);
            }
        }
    }

    /// Decode the compatibility attributes the stack was provisioned with
    pub fn compatibility(&self) -> Result<CompatibilityKey> {
        Ok(CompatibilityKey {
            scheme: parse_enum(SCHEME_TAG, self.require(SCHEME_TAG)?)?,
            security_group: self.get(SECURITY_GROUP_TAG).unwrap_or_default().to_string(),
            ssl_policy: self.get(SSL_POLICY_TAG).unwrap_or_default().to_string(),
            load_balancer_type: match self.get(LOAD_BALANCER_TYPE_TAG) {
                Some(value) => parse_enum(LOAD_BALANCER_TYPE_TAG, value)?,
                None => Default::default(),
            },
            ip_address_type: match self.get(IP_ADDRESS_TYPE_TAG) {
                Some(value) => parse_enum(IP_ADDRESS_TYPE_TAG, value)?,
                None => Default::default(),
            },
            http2: match self.get(HTTP2_TAG) {
                Some(value) => parse_bool(HTTP2_TAG, value)?,
                None => true,
            },
            waf_web_acl_id: self.get(WAF_TAG).filter(|v| !v.is_empty()).map(str::to_string),
        })
    }

    pub fn set_compatibility(&mut self, key: &CompatibilityKey) {
        self.insert(SCHEME_TAG, key.scheme.as_str());
        self.insert(SECURITY_GROUP_TAG, key.security_group.clone());
        self.insert(SSL_POLICY_TAG, key.ssl_policy.clone());
        self.insert(LOAD_BALANCER_TYPE_TAG, key.load_balancer_type.as_str());
        self.insert(IP_ADDRESS_TYPE_TAG, key.ip_address_type.as_str());
        self.insert(HTTP2_TAG, key.http2.to_string());
        match &key.waf_web_acl_id {
            Some(waf) => self.insert(WAF_TAG, waf.clone()),
            None => {
                self.remove(WAF_TAG);
            }
        }
    }

    pub fn alarm_config_hash(&self) -> Option<&str> {
        self.get(ALARM_HASH_TAG)
    }

    pub fn set_alarm_config_hash(&mut self, hash: Option<&str>) {
        match hash {
            Some(hash) => self.insert(ALARM_HASH_TAG, hash),
            None => {
                self.remove(ALARM_HASH_TAG);
            }
        }
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| ControllerError::invalid_tag(key, "", "required tag is missing"))
    }
}

fn parse_time(key: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ControllerError::invalid_tag(key, value, e.to_string()))
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value.parse().map_err(|_| ControllerError::invalid_tag(key, value, "expected true or false"))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|reason: String| ControllerError::invalid_tag(key, value, reason))
}

/// Actual provisioned state of one load balancer, discovered by tag scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub name: StackName,
    pub status: StackStatus,
    /// DNS name of the load balancer, once provisioned
    pub dns_name: Option<String>,
    /// Routing target (target group) instances are registered with
    pub target_group: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tags: StackTags,
}

impl Stack {
    /// Age of the stack at `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Address to report to endpoints, if the load balancer is routable
    pub fn address(&self) -> Option<&str> {
        if !self.status.is_complete() {
            return None;
        }
        self.dns_name.as_deref().filter(|name| !name.is_empty())
    }
}
