//! Certificate source trait
//!
//! Defines the interface for pluggable certificate authorities.

use async_trait::async_trait;

use crate::domain::CertificateSummary;
use crate::errors::Result;

/// A place certificates are listed from (an ACM account, an IAM store, a
/// directory of PEM files).
///
/// Implementations must be Send + Sync so the store can fetch from all sources
/// concurrently.
#[async_trait]
pub trait CertificateSource: Send + Sync + std::fmt::Debug {
    /// Short name used in logs and errors
    fn name(&self) -> &str;

    /// List every certificate the source currently offers
    async fn get_certificates(&self) -> Result<Vec<CertificateSummary>>;
}
