//! Execution state models

use crate::core::context::{BuildContext, GitInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    /// Constructed, not initialized (or disabled)
    Idle,
    /// Loading history and preparing integrations
    Initializing,
    /// Accepting build requests
    Ready,
    /// A build is in flight
    Running,
}

/// Final status of a build run that produced results.
///
/// A run in which no combination succeeded is an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every combination succeeded
    Completed,
    /// At least one combination succeeded and at least one failed
    Degraded,
}

/// Outcome of one step invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub success: bool,
    pub duration_ms: u64,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StepResult {
    pub fn success(step: &str, output: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            success: true,
            duration_ms: 0,
            output: output.into(),
            error: None,
            artifacts: BTreeMap::new(),
            metrics: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failure(step: &str, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            step: step.to_string(),
            success: false,
            duration_ms: duration.as_millis() as u64,
            output: String::new(),
            error: Some(error.into()),
            artifacts: BTreeMap::new(),
            metrics: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, name: &str, path: impl Into<String>) -> Self {
        self.artifacts.insert(name.to_string(), path.into());
        self
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Outcome of one platform/environment build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub id: Uuid,
    pub build_id: String,
    pub platform: String,
    pub environment: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub git: GitInfo,
    pub success: bool,
    pub duration_ms: u64,
    pub bundle_size: u64,
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Failed but handled without aborting the run
    #[serde(default)]
    pub degraded: bool,
}

impl BuildResult {
    /// Result assembled from a combination's context after its steps ran
    pub fn from_context(
        context: &BuildContext,
        started_at: DateTime<Utc>,
        success: bool,
        warnings: Vec<String>,
        errors: Vec<String>,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            build_id: context.build_id.clone(),
            platform: context.platform.clone().unwrap_or_default(),
            environment: context.target_environment.clone().unwrap_or_default(),
            started_at,
            completed_at,
            git: context.git.clone(),
            success,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            bundle_size: context.metric(BUNDLE_SIZE_METRIC).unwrap_or(0.0) as u64,
            artifacts: context.artifacts.clone(),
            metrics: context.metrics.clone(),
            warnings,
            errors,
            degraded: false,
        }
    }

    /// Failed result standing in for a combination that could not produce one
    pub fn synthetic_failure(
        build_id: &str,
        platform: &str,
        environment: &str,
        git: &GitInfo,
        started_at: DateTime<Utc>,
        error: String,
        degraded: bool,
    ) -> Self {
        let completed_at = Utc::now();
        let warnings = if degraded {
            vec![format!(
                "Build for {}/{} failed and was handled in degraded mode",
                platform, environment
            )]
        } else {
            Vec::new()
        };
        Self {
            id: Uuid::new_v4(),
            build_id: build_id.to_string(),
            platform: platform.to_string(),
            environment: environment.to_string(),
            started_at,
            completed_at,
            git: git.clone(),
            success: false,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            bundle_size: 0,
            artifacts: BTreeMap::new(),
            metrics: BTreeMap::new(),
            warnings,
            errors: vec![error],
            degraded,
        }
    }

    /// Grouping key used by regression analysis
    pub fn combination_key(&self) -> (&str, &str) {
        (&self.platform, &self.environment)
    }

    pub fn memory_usage(&self) -> Option<f64> {
        self.metrics.get(MEMORY_USAGE_METRIC).copied()
    }
}

pub const BUNDLE_SIZE_METRIC: &str = "bundle_size";
pub const BUILD_TIME_METRIC: &str = "build_time";
pub const MEMORY_USAGE_METRIC: &str = "memory_usage";

/// Everything a finished `execute_build` returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub build_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<BuildResult>,
    pub regressions: Vec<crate::analysis::PerformanceRegression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<std::path::PathBuf>,
}

impl PipelineRun {
    pub fn is_degraded(&self) -> bool {
        self.status == RunStatus::Degraded
    }

    pub fn successful(&self) -> impl Iterator<Item = &BuildResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &BuildResult> {
        self.results.iter().filter(|r| !r.success)
    }
}
