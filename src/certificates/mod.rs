//! # Certificates
//!
//! Certificate sources, the best-match selection for a hostname and the
//! snapshotting store the reconciliation driver reads from.

pub mod matcher;
pub mod pem;
pub mod source;
pub mod static_source;
pub mod store;

pub use matcher::{find_best_match, prefix_glob, NEAR_EXPIRY_DAYS};
pub use pem::PemDirectorySource;
pub use source::CertificateSource;
pub use static_source::StaticCertificateSource;
pub use store::{CertificateSnapshot, CertificateStore};

use std::sync::Arc;

use crate::config::CertificatesConfig;

/// Build the certificate sources named in configuration
pub fn sources_from_config(config: &CertificatesConfig) -> Vec<Arc<dyn CertificateSource>> {
    let mut sources: Vec<Arc<dyn CertificateSource>> = Vec::new();
    if !config.static_certificates.is_empty() {
        sources.push(Arc::new(StaticCertificateSource::new("static", config.static_certificates.clone())));
    }
    for directory in &config.pem_directories {
        sources.push(Arc::new(PemDirectorySource::new(directory)));
    }
    sources
}
