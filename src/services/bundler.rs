//! Bundler CLI subprocess client

use crate::error::PipelineError;
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, warn};

/// What to bundle and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
    pub build_id: String,
    pub platform: String,
    pub environment: String,
    pub output_path: PathBuf,
    pub project_root: PathBuf,
}

/// Result of a successful bundler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct BundleOutput {
    pub stdout: String,
    pub exit_code: i32,
    pub bundle_path: PathBuf,
    pub bundle_size: u64,
    /// Peak resident memory of the bundler, when the implementation can measure it
    pub peak_memory_bytes: Option<u64>,
}

impl BundleOutput {
    /// Warning lines emitted by the bundler
    pub fn warnings(&self) -> Vec<String> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(r"(?i)^\s*(warn|warning)\b[:\s]*(.*)$").expect("valid warning regex"));

        self.stdout
            .lines()
            .filter_map(|line| pattern.captures(line))
            .map(|caps| caps.get(2).map_or("", |m| m.as_str()).trim().to_string())
            .filter(|message| !message.is_empty())
            .collect()
    }
}

/// Black-box bundler collaborator
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, PipelineError>;
}

/// Runs an external bundler command
///
/// Arguments may contain `{platform}`, `{environment}`, `{output}` and
/// `{build_id}` placeholders. The child is killed if the caller stops
/// waiting for it (for example when a step times out).
#[derive(Debug, Clone)]
pub struct CommandBundler {
    program: String,
    args: Vec<String>,
}

impl CommandBundler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command line
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn render_args(&self, request: &BundleRequest) -> Vec<String> {
        let output = request.output_path.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{platform}", &request.platform)
                    .replace("{environment}", &request.environment)
                    .replace("{output}", &output)
                    .replace("{build_id}", &request.build_id)
            })
            .collect()
    }
}

#[async_trait]
impl Bundler for CommandBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, PipelineError> {
        let args = self.render_args(request);
        debug!("Spawning bundler: {} {}", self.program, args.join(" "));

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::file_system(parent, "create_dir", e.to_string()))?;
        }

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.project_root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PipelineError::dependency(&self.program, format!("Failed to spawn bundler: {}", e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Bundler exited with code {} for {}/{}: {}",
                exit_code,
                request.platform,
                request.environment,
                stderr.trim()
            );
            return Err(PipelineError::platform_build(
                &request.platform,
                format!("Bundler exited with code {}", exit_code),
            )
            .with_data("exit_code", exit_code)
            .with_data("stdout", stdout)
            .with_data("stderr", stderr.trim().to_string()));
        }

        let metadata = tokio::fs::metadata(&request.output_path).await.map_err(|e| {
            PipelineError::file_system(
                &request.output_path,
                "stat",
                format!("Bundle was not produced: {}", e),
            )
        })?;

        debug!(
            "Bundler produced {} ({} bytes)",
            request.output_path.display(),
            metadata.len()
        );

        Ok(BundleOutput {
            stdout,
            exit_code,
            bundle_path: request.output_path.clone(),
            bundle_size: metadata.len(),
            peak_memory_bytes: None,
        })
    }
}
