//! Build reports

use crate::analysis::PerformanceRegression;
use crate::core::BuildResult;
use crate::error::PipelineError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const REPORT_PREFIX: &str = "build-report-";

/// Counters over the results of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_builds: usize,
    pub successful_builds: usize,
    pub failed_builds: usize,
    pub degraded_builds: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub average_bundle_size: f64,
    pub total_regressions: usize,
}

impl ReportSummary {
    pub fn from_results(results: &[BuildResult], total_regressions: usize) -> Self {
        let successful: Vec<&BuildResult> = results.iter().filter(|r| r.success).collect();
        let total = results.len();
        let average = |values: Vec<f64>| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        Self {
            total_builds: total,
            successful_builds: successful.len(),
            failed_builds: total - successful.len(),
            degraded_builds: results.iter().filter(|r| r.degraded).count(),
            success_rate: if total == 0 {
                0.0
            } else {
                successful.len() as f64 / total as f64 * 100.0
            },
            average_duration_ms: average(successful.iter().map(|r| r.duration_ms as f64).collect()),
            average_bundle_size: average(successful.iter().map(|r| r.bundle_size as f64).collect()),
            total_regressions,
        }
    }
}

/// The document written once per run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub build_id: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub results: Vec<BuildResult>,
    /// The last few regressions known to the analyzer
    pub regressions: Vec<PerformanceRegression>,
}

impl BuildReport {
    pub fn new(
        build_id: &str,
        results: Vec<BuildResult>,
        regressions: Vec<PerformanceRegression>,
        total_regressions: usize,
    ) -> Self {
        Self {
            build_id: build_id.to_string(),
            generated_at: Utc::now(),
            summary: ReportSummary::from_results(&results, total_regressions),
            results,
            regressions,
        }
    }
}

/// Writes reports into a directory and prunes old ones
pub struct ReportWriter {
    dir: PathBuf,
    retention_days: u32,
    max_reports: usize,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32, max_reports: usize) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
            max_reports,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write(&self, report: &BuildReport) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PipelineError::file_system(&self.dir, "create_dir", e.to_string()))?;

        let path = self
            .dir
            .join(format!("{}{}.json", REPORT_PREFIX, report.build_id));
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| PipelineError::build_step("report", e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| PipelineError::file_system(&path, "write", e.to_string()))?;

        info!("Build report written to {}", path.display());
        Ok(path)
    }

    /// Delete reports older than the retention period, then the oldest
    /// reports beyond `max_reports`. Returns how many were removed.
    pub async fn prune(&self) -> Result<usize, PipelineError> {
        let mut reports = match self.list().await {
            Ok(reports) => reports,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(PipelineError::file_system(&self.dir, "read_dir", e.to_string())),
        };
        reports.sort_by_key(|(_, modified)| *modified);

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.retention_days));
        let expired = reports.iter().filter(|(_, modified)| *modified < cutoff).count();
        let over_limit = reports.len().saturating_sub(self.max_reports);
        let remove = expired.max(over_limit);

        for (path, _) in &reports[..remove] {
            debug!("Removing old report {}", path.display());
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| PipelineError::file_system(path, "remove", e.to_string()))?;
        }
        if remove > 0 {
            info!("Pruned {} old build reports", remove);
        }
        Ok(remove)
    }

    async fn list(&self) -> std::io::Result<Vec<(PathBuf, DateTime<Utc>)>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut reports = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(REPORT_PREFIX) && name.ends_with(".json")) {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            reports.push((entry.path(), DateTime::<Utc>::from(modified)));
        }
        Ok(reports)
    }
}
