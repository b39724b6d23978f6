//! Pipeline configuration from YAML
//!
//! Every section carries serde defaults so a partial YAML document or a
//! partial JSON override only has to name the fields it changes.

use crate::error::PipelineError;
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Top-level build pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildPipelineConfig {
    /// Master switch; a disabled pipeline never initializes
    pub enabled: bool,

    /// Platforms built when a run does not name any
    pub platforms: Vec<String>,

    /// Environments built when a run does not name any
    pub environments: Vec<String>,

    pub ci: CiConfig,
    pub regression: RegressionConfig,
    pub benchmarking: BenchmarkConfig,
    pub optimization: OptimizationConfig,
    pub artifacts: ArtifactConfig,
    pub error_handling: ErrorHandlingConfig,
    pub steps: StepTimings,
}

impl Default for BuildPipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            platforms: vec!["android".to_string(), "ios".to_string()],
            environments: vec!["development".to_string(), "production".to_string()],
            ci: CiConfig::default(),
            regression: RegressionConfig::default(),
            benchmarking: BenchmarkConfig::default(),
            optimization: OptimizationConfig::default(),
            artifacts: ArtifactConfig::default(),
            error_handling: ErrorHandlingConfig::default(),
            steps: StepTimings::default(),
        }
    }
}

/// CI trigger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiConfig {
    pub enabled: bool,
    /// Expected provider; `None` accepts whatever is detected
    pub provider: Option<String>,
    pub branches: Vec<String>,
    pub on_push: bool,
    pub on_pull_request: bool,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            branches: vec!["main".to_string()],
            on_push: true,
            on_pull_request: true,
        }
    }
}

/// Cutoffs relative to a metric's threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityCutoffs {
    /// Regression is raised above `threshold × minor`
    pub minor: f64,
    /// Regression is major above `threshold × major`
    pub major: f64,
}

impl Default for SeverityCutoffs {
    fn default() -> Self {
        Self { minor: 1.0, major: 2.0 }
    }
}

/// Regression detection thresholds, in percent over the baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    pub enabled: bool,
    pub threshold_bundle_size: f64,
    pub threshold_build_time: f64,
    pub threshold_memory_usage: f64,
    /// Number of most recent history entries analyzed after each run
    pub analysis_window: usize,
    pub alert_on_regression: bool,
    pub bundle_size_cutoffs: SeverityCutoffs,
    pub build_time_cutoffs: SeverityCutoffs,
    pub memory_usage_cutoffs: SeverityCutoffs,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bundle_size: 10.0,
            threshold_build_time: 20.0,
            threshold_memory_usage: 15.0,
            analysis_window: 10,
            alert_on_regression: true,
            bundle_size_cutoffs: SeverityCutoffs::default(),
            build_time_cutoffs: SeverityCutoffs::default(),
            memory_usage_cutoffs: SeverityCutoffs::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub enabled: bool,
    /// Samples per benchmark run
    pub iterations: u32,
    /// Discarded samples before measuring
    pub warmup_runs: u32,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            iterations: 5,
            warmup_runs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub cache_warming: bool,
    pub bundle_analysis: bool,
    /// Bundle budget in bytes; analysis warns when exceeded
    pub max_bundle_size: Option<u64>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            cache_warming: true,
            bundle_analysis: true,
            max_bundle_size: None,
        }
    }
}

/// Artifact retention policy and locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub retention_days: u32,
    pub max_reports: usize,
    pub reports_dir: PathBuf,
    pub history_path: PathBuf,
    /// Where bundles are written; `{platform}` and `{environment}` are substituted
    pub output_dir: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            retention_days: 30,
            max_reports: 50,
            reports_dir: data_dir.join("reports"),
            history_path: data_dir.join("build-history.json"),
            output_dir: PathBuf::from("build/{platform}/{environment}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    pub max_global_retries: u32,
    pub global_retry_delay_multiplier: f64,
    pub recovery_timeout_ms: u64,
    pub enable_auto_recovery: bool,
    pub enable_graceful_degradation: bool,
    pub continue_on_non_critical: bool,
    pub fallback_dir: PathBuf,
    pub reports_dir: PathBuf,
    /// A kind seen more often than this gets a recommendation in reports
    pub recommendation_threshold: u64,
    pub max_retained_errors: usize,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            max_global_retries: 3,
            global_retry_delay_multiplier: 1.0,
            recovery_timeout_ms: 30_000,
            enable_auto_recovery: true,
            enable_graceful_degradation: true,
            continue_on_non_critical: true,
            fallback_dir: std::env::temp_dir().join("build-pipeline-fallback"),
            reports_dir: default_data_dir().join("error-reports"),
            recommendation_threshold: 3,
            max_retained_errors: 1000,
        }
    }
}

/// Per-step timeouts and retry budgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepTimings {
    pub cache_warm_timeout_secs: u64,
    pub bundle_timeout_secs: u64,
    pub analysis_timeout_secs: u64,
    pub benchmark_timeout_secs: u64,
    pub bundle_retries: u32,
}

impl Default for StepTimings {
    fn default() -> Self {
        Self {
            cache_warm_timeout_secs: 60,
            bundle_timeout_secs: 600,
            analysis_timeout_secs: 120,
            benchmark_timeout_secs: 300,
            bundle_retries: 2,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("build-pipeline")
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("valid identifier regex"))
}

/// Check a platform or environment name
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

impl BuildPipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BuildPipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Deep-merge a JSON override document over this configuration
    pub fn with_overrides(&self, overrides: &Value) -> Result<Self, PipelineError> {
        let mut base = serde_json::to_value(self)
            .map_err(|e| PipelineError::configuration(format!("Cannot serialize configuration: {}", e)))?;
        merge_values(&mut base, overrides);
        let merged: BuildPipelineConfig = serde_json::from_value(base)
            .map_err(|e| PipelineError::configuration(format!("Invalid configuration override: {}", e)))?;
        merged
            .validate()
            .map_err(|e| PipelineError::configuration(e.to_string()))?;
        Ok(merged)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        for name in self.platforms.iter().chain(self.environments.iter()) {
            if !is_valid_identifier(name) {
                anyhow::bail!("Invalid platform/environment name: '{}'", name);
            }
        }

        let thresholds = [
            ("threshold_bundle_size", self.regression.threshold_bundle_size),
            ("threshold_build_time", self.regression.threshold_build_time),
            ("threshold_memory_usage", self.regression.threshold_memory_usage),
        ];
        for (name, value) in thresholds {
            if !(value.is_finite() && value > 0.0) {
                anyhow::bail!("Regression {} must be a positive percentage, got {}", name, value);
            }
        }

        let cutoffs = [
            ("bundle_size_cutoffs", self.regression.bundle_size_cutoffs),
            ("build_time_cutoffs", self.regression.build_time_cutoffs),
            ("memory_usage_cutoffs", self.regression.memory_usage_cutoffs),
        ];
        for (name, cutoff) in cutoffs {
            if cutoff.minor <= 0.0 || cutoff.major < cutoff.minor {
                anyhow::bail!(
                    "Regression {} must satisfy 0 < minor <= major (got minor={}, major={})",
                    name,
                    cutoff.minor,
                    cutoff.major
                );
            }
        }

        if self.regression.analysis_window < 2 {
            anyhow::bail!("Regression analysis_window must be at least 2");
        }

        if self.error_handling.global_retry_delay_multiplier < 0.0 {
            anyhow::bail!("error_handling.global_retry_delay_multiplier must not be negative");
        }

        if self.benchmarking.enabled && self.benchmarking.iterations == 0 {
            anyhow::bail!("benchmarking.iterations must be at least 1 when benchmarking is enabled");
        }

        Ok(())
    }
}

fn merge_values(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
