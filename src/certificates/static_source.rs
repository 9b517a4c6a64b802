//! Certificate source backed by a fixed list, typically from configuration.

use async_trait::async_trait;

use super::source::CertificateSource;
use crate::domain::CertificateSummary;
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct StaticCertificateSource {
    name: String,
    certificates: Vec<CertificateSummary>,
}

impl StaticCertificateSource {
    pub fn new(name: impl Into<String>, certificates: Vec<CertificateSummary>) -> Self {
        Self { name: name.into(), certificates }
    }
}

#[async_trait]
impl CertificateSource for StaticCertificateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_certificates(&self) -> Result<Vec<CertificateSummary>> {
        Ok(self.certificates.clone())
    }
}
