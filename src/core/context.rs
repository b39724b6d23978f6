//! Build context - per-run facts and the artifacts/metrics steps produce

use crate::core::config::BuildPipelineConfig;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Facts about the machine running the build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Host operating system
    pub host_platform: String,
    /// Tool name -> version
    pub tool_versions: BTreeMap<String, String>,
    pub project_root: PathBuf,
}

impl EnvironmentInfo {
    pub fn detect(project_root: impl Into<PathBuf>) -> Self {
        let mut tool_versions = BTreeMap::new();
        tool_versions.insert("build-pipeline".to_string(), env!("CARGO_PKG_VERSION").to_string());
        Self {
            host_platform: std::env::consts::OS.to_string(),
            tool_versions,
            project_root: project_root.into(),
        }
    }
}

/// Source-control provenance of a build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub branch: String,
    pub commit: String,
    pub author: String,
    pub message: String,
}

impl Default for GitInfo {
    fn default() -> Self {
        Self {
            branch: "unknown".to_string(),
            commit: "unknown".to_string(),
            author: "unknown".to_string(),
            message: String::new(),
        }
    }
}

impl GitInfo {
    /// Read provenance from the repository at `root`; unknown fields stay "unknown"
    pub async fn collect(root: &Path) -> Self {
        let defaults = Self::default();
        Self {
            branch: git(root, &["rev-parse", "--abbrev-ref", "HEAD"])
                .await
                .unwrap_or(defaults.branch),
            commit: git(root, &["rev-parse", "HEAD"]).await.unwrap_or(defaults.commit),
            author: git(root, &["log", "-1", "--pretty=%an"])
                .await
                .unwrap_or(defaults.author),
            message: git(root, &["log", "-1", "--pretty=%s"])
                .await
                .unwrap_or(defaults.message),
        }
    }
}

async fn git(root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        debug!("git {} failed in {}", args.join(" "), root.display());
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Execution context for one pipeline run
///
/// The orchestrator builds one base context per run and hands every
/// platform/environment combination its own copy, so steps of different
/// combinations never write into the same maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildContext {
    pub build_id: String,
    pub config: BuildPipelineConfig,
    pub environment: EnvironmentInfo,
    pub git: GitInfo,

    /// Platform of this combination (unset on the base context)
    pub platform: Option<String>,
    /// Environment of this combination (unset on the base context)
    pub target_environment: Option<String>,

    /// Artifact name -> path, written by steps as they run
    pub artifacts: BTreeMap<String, String>,
    /// Metric name -> value, written by steps as they run
    pub metrics: BTreeMap<String, f64>,
}

impl BuildContext {
    pub fn new(config: BuildPipelineConfig, environment: EnvironmentInfo, git: GitInfo) -> Self {
        Self {
            build_id: new_build_id(),
            config,
            environment,
            git,
            platform: None,
            target_environment: None,
            artifacts: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// Copy of this context scoped to one combination
    pub fn for_combination(&self, platform: &str, environment: &str) -> Self {
        let mut context = self.clone();
        context.platform = Some(platform.to_string());
        context.target_environment = Some(environment.to_string());
        context.artifacts.clear();
        context.metrics.clear();
        context
    }

    /// Identifier of one combination within the run
    pub fn combination_id(&self) -> String {
        match (&self.platform, &self.target_environment) {
            (Some(p), Some(e)) => format!("{}-{}-{}", self.build_id, p, e),
            _ => self.build_id.clone(),
        }
    }

    pub fn set_artifact(&mut self, name: &str, path: impl Into<String>) {
        self.artifacts.insert(name.to_string(), path.into());
    }

    pub fn artifact(&self, name: &str) -> Option<&str> {
        self.artifacts.get(name).map(String::as_str)
    }

    pub fn set_metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Merge a step's outputs; later steps overwrite earlier keys
    pub fn merge(&mut self, artifacts: &BTreeMap<String, String>, metrics: &BTreeMap<String, f64>) {
        self.artifacts
            .extend(artifacts.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.metrics.extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
    }

    /// Bundle output path for this combination
    pub fn bundle_output_path(&self) -> PathBuf {
        let platform = self.platform.as_deref().unwrap_or("unknown");
        let environment = self.target_environment.as_deref().unwrap_or("unknown");
        let dir = self
            .config
            .artifacts
            .output_dir
            .display()
            .to_string()
            .replace("{platform}", platform)
            .replace("{environment}", environment);
        let dir = PathBuf::from(dir);
        let dir = if dir.is_absolute() {
            dir
        } else {
            self.environment.project_root.join(dir)
        };
        dir.join(format!("index.{}.bundle", platform))
    }
}

fn new_build_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("build-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
}
