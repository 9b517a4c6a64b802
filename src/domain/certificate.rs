//! Certificate summaries as published by certificate sources.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::id::CertificateId;

/// Immutable view of one certificate: identity, covered names and validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub id: CertificateId,
    /// Domain patterns covered, including wildcard entries such as `*.example.org`
    pub domain_names: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateSummary {
    pub fn new(
        id: impl Into<CertificateId>,
        domain_names: Vec<String>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self { id: id.into(), domain_names, not_before, not_after }
    }

    /// Whether `now` lies inside the validity window
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !(now > self.not_after || now < self.not_before)
    }

    /// Whether the certificate expires within `margin` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.not_after - margin < now
    }
}
