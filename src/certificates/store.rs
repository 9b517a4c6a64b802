//! Certificate store with snapshot semantics
//!
//! Refreshing fetches from every source concurrently and publishes a new
//! snapshot only when all of them succeed. Readers get an `Arc` to an immutable
//! snapshot, so a refresh never changes data a pass is iterating over.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use super::matcher;
use super::source::CertificateSource;
use crate::domain::CertificateSummary;
use crate::errors::{ControllerError, Result};
use crate::observability::metrics;

/// Point-in-time view of all known certificates
pub type CertificateSnapshot = Arc<Vec<CertificateSummary>>;

#[derive(Debug)]
pub struct CertificateStore {
    sources: Vec<Arc<dyn CertificateSource>>,
    snapshot: RwLock<CertificateSnapshot>,
}

impl CertificateStore {
    /// Create an empty store over `sources`; call [`CertificateStore::refresh`]
    /// before the first pass.
    pub fn new(sources: Vec<Arc<dyn CertificateSource>>) -> Self {
        Self { sources, snapshot: RwLock::new(Arc::new(Vec::new())) }
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> CertificateSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Best certificate for `hostname` in the current snapshot
    pub async fn find_best_match(&self, hostname: &str, now: DateTime<Utc>) -> Result<CertificateSummary> {
        let snapshot = self.snapshot().await;
        matcher::find_best_match(&snapshot, hostname, now).cloned()
    }

    /// Fetch from all sources and swap in the result. On any failure the
    /// previous snapshot stays in place and the first error is returned.
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn refresh(&self) -> Result<usize> {
        let results = join_all(self.sources.iter().map(|source| async move {
            source.get_certificates().await.map_err(|e| match e {
                ControllerError::CertificateSource { .. } => e,
                other => ControllerError::certificate_source(source.name(), other.to_string()),
            })
        }))
        .await;

        let mut certificates = Vec::new();
        for result in results {
            match result {
                Ok(batch) => certificates.extend(batch),
                Err(e) => {
                    metrics::record_certificate_refresh(false, 0).await;
                    return Err(e);
                }
            }
        }

        let count = certificates.len();
        *self.snapshot.write().await = Arc::new(certificates);
        metrics::record_certificate_refresh(true, count).await;
        debug!(certificates = count, "Published certificate snapshot");
        Ok(count)
    }

    /// Refresh on a fixed interval until the task is aborted. The first tick
    /// fires after `interval`; callers refresh once up front.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                match self.refresh().await {
                    Ok(count) => info!(certificates = count, "Certificate store refreshed"),
                    Err(e) => error!(error = %e, "Certificate refresh failed, keeping previous snapshot"),
                }
            }
        })
    }
}
