pub mod downloaders;

use crate::config::DatasetConfig;
use crate::error::Result;
use crate::storage::write_bytes_atomic;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// One external dataset the orchestrator keeps fresh. Thresholds differ per
/// dataset: a monthly-updated source carries a shorter threshold than a
/// quarterly one.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub id: String,
    pub url: String,
    pub threshold_days: u32,
}

impl DatasetSpec {
    pub fn from_config(config: &DatasetConfig) -> Self {
        Self {
            id: config.id.clone(),
            url: config.url.clone(),
            threshold_days: config.threshold_days,
        }
    }

    pub fn artifact_name(&self) -> String {
        format!("{}.json", self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Downloaded,
    Skipped,
    Failed,
}

/// Per-dataset result; one dataset's failure never blocks the others.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub dataset_id: String,
    pub status: FetchStatus,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub outcomes: Vec<FetchOutcome>,
}

impl FetchReport {
    pub fn count(&self, status: FetchStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn log_summary(&self) {
        info!(
            downloaded = self.count(FetchStatus::Downloaded),
            skipped = self.count(FetchStatus::Skipped),
            failed = self.count(FetchStatus::Failed),
            "dataset refresh summary"
        );
        for outcome in &self.outcomes {
            if outcome.status == FetchStatus::Failed {
                warn!(dataset = %outcome.dataset_id, reason = %outcome.reason, "dataset refresh failed");
            }
        }
    }
}

/// Port for fetching one dataset's raw bytes; tests substitute a mock so
/// freshness decisions can be verified without network access.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, spec: &DatasetSpec) -> Result<Vec<u8>>;
}

pub struct FetchOrchestrator {
    raw_root: PathBuf,
    downloader: Box<dyn Downloader>,
    dry_run: bool,
}

impl FetchOrchestrator {
    pub fn new(data_root: &Path, downloader: Box<dyn Downloader>) -> Self {
        Self { raw_root: data_root.join("raw"), downloader, dry_run: false }
    }

    /// Report-only mode: decide per dataset but never touch network or disk.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn artifact_path(&self, spec: &DatasetSpec) -> PathBuf {
        self.raw_root.join(spec.artifact_name())
    }

    /// Decides whether `spec` needs a re-download and performs it unless the
    /// cached artifact is inside its freshness threshold (or dry-run is on).
    pub async fn ensure_fresh(&self, spec: &DatasetSpec, force: bool) -> FetchOutcome {
        let path = self.artifact_path(spec);
        if !force {
            if let Some(age_days) = artifact_age_days(&path) {
                if age_days <= f64::from(spec.threshold_days) {
                    info!(dataset = %spec.id, age_days = format!("{:.1}", age_days), "artifact fresh, skipping download");
                    return FetchOutcome {
                        dataset_id: spec.id.clone(),
                        status: FetchStatus::Skipped,
                        reason: format!("artifact is {:.1} days old (threshold {})", age_days, spec.threshold_days),
                    };
                }
            }
        }

        if self.dry_run {
            return FetchOutcome {
                dataset_id: spec.id.clone(),
                status: FetchStatus::Skipped,
                reason: "dry run: download needed but not performed".to_string(),
            };
        }

        match self.download(spec, &path).await {
            Ok(bytes) => FetchOutcome {
                dataset_id: spec.id.clone(),
                status: FetchStatus::Downloaded,
                reason: format!("downloaded {} bytes", bytes),
            },
            Err(e) => FetchOutcome {
                dataset_id: spec.id.clone(),
                status: FetchStatus::Failed,
                reason: e.to_string(),
            },
        }
    }

    async fn download(&self, spec: &DatasetSpec, path: &Path) -> Result<usize> {
        info!(dataset = %spec.id, "downloading dataset");
        let bytes = self.downloader.fetch(spec).await?;
        write_bytes_atomic(path, &bytes)?;
        Ok(bytes.len())
    }

    /// Refreshes every dataset independently and collects a summary report.
    pub async fn refresh_all(&self, specs: &[DatasetSpec], force: bool) -> FetchReport {
        let mut report = FetchReport::default();
        for spec in specs {
            let outcome = self.ensure_fresh(spec, force).await;
            report.outcomes.push(outcome);
        }
        report.log_summary();
        report
    }
}

fn artifact_age_days(path: &Path) -> Option<f64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let age = SystemTime::now().duration_since(modified).ok()?;
    Some(age.as_secs_f64() / 86_400.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct CountingDownloader {
        calls: Arc<AtomicUsize>,
        payload: Vec<u8>,
    }

    #[async_trait]
    impl Downloader for CountingDownloader {
        async fn fetch(&self, _spec: &DatasetSpec) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    struct FailingDownloader;

    #[async_trait]
    impl Downloader for FailingDownloader {
        async fn fetch(&self, spec: &DatasetSpec) -> Result<Vec<u8>> {
            Err(crate::error::PipelineError::TransientNetwork(format!(
                "{} unavailable",
                spec.id
            )))
        }
    }

    fn spec(id: &str, threshold_days: u32) -> DatasetSpec {
        DatasetSpec {
            id: id.to_string(),
            url: format!("https://example.com/{}.json", id),
            threshold_days,
        }
    }

    #[tokio::test]
    async fn fresh_artifact_skips_download_entirely() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = FetchOrchestrator::new(
            dir.path(),
            Box::new(CountingDownloader { calls: calls.clone(), payload: b"[]".to_vec() }),
        );
        let spec = spec("hdb_resale", 30);

        // First pass downloads, second pass must not touch the downloader.
        let first = orchestrator.ensure_fresh(&spec, false).await;
        assert_eq!(first.status, FetchStatus::Downloaded);
        let second = orchestrator.ensure_fresh(&spec, false).await;
        assert_eq!(second.status, FetchStatus::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_overrides_freshness() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = FetchOrchestrator::new(
            dir.path(),
            Box::new(CountingDownloader { calls: calls.clone(), payload: b"[]".to_vec() }),
        );
        let spec = spec("hdb_resale", 30);

        orchestrator.ensure_fresh(&spec, false).await;
        let forced = orchestrator.ensure_fresh(&spec, true).await;
        assert_eq!(forced.status, FetchStatus::Downloaded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_other_datasets() {
        let dir = tempdir().unwrap();
        let orchestrator = FetchOrchestrator::new(dir.path(), Box::new(FailingDownloader));
        let specs = vec![spec("hdb_resale", 30), spec("private_transactions", 90)];

        let report = orchestrator.refresh_all(&specs, false).await;
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.count(FetchStatus::Failed), 2);
    }

    #[tokio::test]
    async fn dry_run_reports_without_downloading() {
        let dir = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = FetchOrchestrator::new(
            dir.path(),
            Box::new(CountingDownloader { calls: calls.clone(), payload: b"[]".to_vec() }),
        )
        .dry_run();
        let spec = spec("hdb_resale", 30);

        let outcome = orchestrator.ensure_fresh(&spec, false).await;
        assert_eq!(outcome.status, FetchStatus::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!orchestrator.artifact_path(&spec).exists());
    }
}
