//! Certificate source reading PEM files from local directories.
//!
//! Each `.pem`/`.crt` file contributes its leaf certificate (the first
//! `CERTIFICATE` block). The certificate identifier is the hex SHA-256
//! fingerprint of the DER encoding, so renaming a file does not change it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use super::source::CertificateSource;
use crate::domain::CertificateSummary;
use crate::errors::{ControllerError, Result};

const CERTIFICATE_EXTENSIONS: &[&str] = &["pem", "crt"];

#[derive(Debug, Clone)]
pub struct PemDirectorySource {
    name: String,
    directory: PathBuf,
}

impl PemDirectorySource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        Self { name: format!("pem:{}", directory.display()), directory }
    }

    async fn certificate_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.directory).await.map_err(|e| {
            ControllerError::from(e).with_context(format!("read {}", self.directory.display()))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| CERTIFICATE_EXTENSIONS.contains(&ext));
            if matches && entry.file_type().await?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl CertificateSource for PemDirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_certificates(&self) -> Result<Vec<CertificateSummary>> {
        let files = self
            .certificate_files()
            .await
            .map_err(|e| ControllerError::certificate_source(&self.name, e.to_string()))?;

        let mut certificates = Vec::with_capacity(files.len());
        for path in files {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                ControllerError::from(e).with_context(format!("read {}", path.display()))
            })?;
            match parse_certificate_pem(&path, &bytes) {
                Ok(summary) => {
                    debug!(path = %path.display(), id = %summary.id, names = ?summary.domain_names, "Loaded certificate");
                    certificates.push(summary);
                }
                // One unreadable file must not hide every other certificate
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping certificate file"),
            }
        }
        Ok(certificates)
    }
}

/// Parse the leaf certificate of a PEM document into a summary.
pub fn parse_certificate_pem(path: &Path, bytes: &[u8]) -> Result<CertificateSummary> {
    let pem = Pem::iter_from_buffer(bytes)
        .filter_map(|block| block.ok())
        .find(|block| block.label == "CERTIFICATE")
        .ok_or_else(|| ControllerError::certificate(path, "no CERTIFICATE block found"))?;

    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| ControllerError::certificate(path, format!("invalid DER: {}", e)))?;

    let domain_names = domain_names(&cert);
    if domain_names.is_empty() {
        return Err(ControllerError::certificate(path, "certificate names no DNS hosts"));
    }

    let validity = cert.validity();
    let not_before = to_datetime(path, validity.not_before.timestamp())?;
    let not_after = to_datetime(path, validity.not_after.timestamp())?;

    let id = hex::encode(Sha256::digest(&pem.contents));
    Ok(CertificateSummary::new(id, domain_names, not_before, not_after))
}

/// DNS subject alternative names, falling back to the subject common name.
fn domain_names(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut names = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    names.push(dns.to_string());
                }
            }
        }
    }

    if names.is_empty() {
        if let Some(cn) = cert.subject().iter_common_name().next().and_then(|cn| cn.as_str().ok()) {
            names.push(cn.to_string());
        }
    }
    names
}

fn to_datetime(path: &Path, timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| ControllerError::certificate(path, format!("timestamp {} out of range", timestamp)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{date_time_ymd, CertificateParams, DnType, KeyPair};
    use tempfile::TempDir;

    fn certificate_pem(names: &[&str]) -> String {
        let mut params =
            CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "albkeeper test");
        params.not_before = date_time_ymd(2024, 1, 1);
        params.not_after = date_time_ymd(2034, 1, 1);
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn parses_names_and_validity() {
        let pem = certificate_pem(&["*.example.org", "example.org"]);
        let summary = parse_certificate_pem(Path::new("test.pem"), pem.as_bytes()).unwrap();

        assert_eq!(summary.domain_names, vec!["*.example.org", "example.org"]);
        assert_eq!(summary.not_before.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(summary.not_after.to_rfc3339(), "2034-01-01T00:00:00+00:00");
        assert_eq!(summary.id.as_str().len(), 64);
    }

    #[test]
    fn rejects_documents_without_certificate() {
        let err = parse_certificate_pem(Path::new("key.pem"), b"not a pem").unwrap_err();
        assert!(matches!(err, ControllerError::Certificate { .. }));
    }

    #[tokio::test]
    async fn directory_source_skips_unreadable_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pem"), certificate_pem(&["a.example.org"])).unwrap();
        std::fs::write(dir.path().join("b.crt"), certificate_pem(&["b.example.org"])).unwrap();
        std::fs::write(dir.path().join("broken.pem"), "garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = PemDirectorySource::new(dir.path());
        let certificates = source.get_certificates().await.unwrap();
        let names: Vec<&str> = certificates.iter().map(|c| c.domain_names[0].as_str()).collect();
        assert_eq!(names, vec!["a.example.org", "b.example.org"]);
    }

    #[tokio::test]
    async fn missing_directory_is_a_source_error() {
        let source = PemDirectorySource::new("/nonexistent/albkeeper/certs");
        let err = source.get_certificates().await.unwrap_err();
        assert!(matches!(err, ControllerError::CertificateSource { .. }));
        assert!(err.is_retryable());
    }
}
