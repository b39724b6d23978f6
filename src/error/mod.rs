//! Structured error taxonomy for the build pipeline
//!
//! Every failure that crosses a step or I/O boundary is lifted into a
//! [`PipelineError`]. The kind fixes the default severity, recoverability and
//! retry policy; the per-kind constructors inject those defaults so an error
//! can never be built with an unresolved context.

pub mod handler;
pub mod recovery;
pub mod stats;

pub use handler::{Degradation, DegradationMode, ErrorHandler, ErrorScope, Handled};
pub use recovery::{DegradationStrategy, RecoveryStrategy};
pub use stats::ErrorHandlingStats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// How bad an error is for the surrounding run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Closed set of pipeline error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Configuration,
    BuildStep,
    FileSystem,
    Network,
    PlatformBuild,
    PerformanceRegression,
    Dependency,
    Timeout,
    ResourceConstraint,
    Ci,
}

/// Fixed policy attached to an error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindDefaults {
    pub severity: Severity,
    pub recoverable: bool,
    pub should_retry: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Configuration,
        ErrorKind::BuildStep,
        ErrorKind::FileSystem,
        ErrorKind::Network,
        ErrorKind::PlatformBuild,
        ErrorKind::PerformanceRegression,
        ErrorKind::Dependency,
        ErrorKind::Timeout,
        ErrorKind::ResourceConstraint,
        ErrorKind::Ci,
    ];

    /// Type name used in logs, statistics and reports
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::BuildStep => "BuildStepError",
            ErrorKind::FileSystem => "FileSystemError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::PlatformBuild => "PlatformBuildError",
            ErrorKind::PerformanceRegression => "PerformanceRegressionError",
            ErrorKind::Dependency => "DependencyError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::ResourceConstraint => "ResourceConstraintError",
            ErrorKind::Ci => "CIError",
        }
    }

    pub fn defaults(&self) -> KindDefaults {
        let (severity, recoverable, should_retry, max_retries, retry_delay_ms) = match self {
            ErrorKind::Configuration => (Severity::Critical, false, false, 0, 0),
            ErrorKind::BuildStep => (Severity::Medium, true, true, 3, 1000),
            ErrorKind::FileSystem => (Severity::Medium, true, true, 3, 500),
            ErrorKind::Network => (Severity::Medium, true, true, 5, 2000),
            ErrorKind::PlatformBuild => (Severity::High, true, false, 0, 0),
            ErrorKind::PerformanceRegression => (Severity::Medium, true, false, 0, 0),
            ErrorKind::Dependency => (Severity::High, true, true, 3, 1000),
            ErrorKind::Timeout => (Severity::Medium, true, true, 1, 5000),
            ErrorKind::ResourceConstraint => (Severity::Critical, true, false, 0, 0),
            ErrorKind::Ci => (Severity::Medium, true, false, 0, 0),
        };
        KindDefaults {
            severity,
            recoverable,
            should_retry,
            max_retries,
            retry_delay_ms,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Correlation data and policy carried by every pipeline error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub build_id: Option<String>,
    pub platform: Option<String>,
    pub environment: Option<String>,
    /// Free-form data attached by the raising site
    pub data: BTreeMap<String, Value>,
    pub recovery_suggestions: Vec<String>,
    pub recoverable: bool,
    pub severity: Severity,
    pub should_retry: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl ErrorContext {
    fn for_kind(kind: ErrorKind) -> Self {
        let defaults = kind.defaults();
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            build_id: None,
            platform: None,
            environment: None,
            data: BTreeMap::new(),
            recovery_suggestions: Vec::new(),
            recoverable: defaults.recoverable,
            severity: defaults.severity,
            should_retry: defaults.should_retry,
            max_retries: defaults.max_retries,
            retry_delay_ms: defaults.retry_delay_ms,
        }
    }
}

/// A classified pipeline failure
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{}: {}", .kind.name(), .message)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    /// Debug chain of the original error when this one was lifted from a foreign error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl PipelineError {
    /// Create an error of `kind` with the kind's defaults
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::for_kind(kind),
            stack: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message).with_suggestions([
            "Check the pipeline configuration file for typos",
            "Run `build-pipeline validate` to see every invalid field",
        ])
    }

    pub fn build_step(step: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BuildStep, message)
            .with_data("step", step)
            .with_suggestions([
                "Inspect the step output for the failing command",
                "Re-run the build with --verbose",
            ])
    }

    pub fn file_system(path: impl AsRef<Path>, operation: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileSystem, message)
            .with_data("path", path.as_ref().display().to_string())
            .with_data("operation", operation)
            .with_suggestions([
                "Check that the path exists and is writable",
                "Check available disk space",
            ])
    }

    pub fn network(endpoint: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
            .with_data("endpoint", endpoint)
            .with_suggestions([
                "Check network connectivity",
                "Retry once the remote service is reachable",
            ])
    }

    pub fn platform_build(platform: &str, message: impl Into<String>) -> Self {
        let mut error = Self::new(ErrorKind::PlatformBuild, message).with_suggestions([
            "Check the platform toolchain installation",
            "Clean the platform build directory and rebuild",
        ]);
        error.context.platform = Some(platform.to_string());
        error
    }

    pub fn performance_regression(metric: &str, regression_percent: f64) -> Self {
        Self::new(
            ErrorKind::PerformanceRegression,
            format!("{} regressed by {:.1}%", metric, regression_percent),
        )
        .with_data("metric", metric)
        .with_data("regression", regression_percent)
        .with_suggestions(["Compare the latest build against the baseline builds"])
    }

    pub fn dependency(name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, message)
            .with_data("dependency", name)
            .with_suggestions([
                "Reinstall project dependencies",
                "Check that the required tool is on PATH",
            ])
    }

    pub fn timeout(operation: &str, timeout: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("{} timed out after {}ms", operation, timeout.as_millis()),
        )
        .with_data("operation", operation)
        .with_data("timeout_ms", timeout.as_millis() as u64)
        .with_suggestions([
            "Increase the step timeout",
            "Check for a hung external process",
        ])
    }

    pub fn resource_constraint(resource: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceConstraint, message)
            .with_data("resource", resource)
            .with_suggestions([
                "Reduce the number of concurrent builds",
                "Increase the memory available to the build host",
            ])
    }

    pub fn ci(provider: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Ci, message)
            .with_data("provider", provider)
            .with_suggestions(["Check the CI trigger settings"])
    }

    /// Lift any error into a pipeline error.
    ///
    /// Pipeline errors pass through unchanged; anything else becomes a generic
    /// build-step error that keeps the original chain as its stack.
    pub fn classify(error: anyhow::Error) -> Self {
        match error.downcast::<PipelineError>() {
            Ok(pipeline_error) => pipeline_error,
            Err(other) => {
                let mut lifted = Self::build_step("unknown", other.to_string());
                lifted.stack = Some(format!("{:?}", other));
                lifted
            }
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context
            .recovery_suggestions
            .extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.context.severity = severity;
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.context.recoverable = recoverable;
        self
    }

    pub fn with_retry_policy(mut self, should_retry: bool, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.context.should_retry = should_retry;
        self.context.max_retries = max_retries;
        self.context.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Tag the error with build correlation; fields already set are kept
    pub fn with_scope(mut self, scope: &ErrorScope) -> Self {
        if self.context.build_id.is_none() {
            self.context.build_id = scope.build_id.clone();
        }
        if self.context.platform.is_none() {
            self.context.platform = scope.platform.clone();
        }
        if self.context.environment.is_none() {
            self.context.environment = scope.environment.clone();
        }
        self
    }

    pub fn severity(&self) -> Severity {
        self.context.severity
    }

    pub fn is_recoverable(&self) -> bool {
        self.context.recoverable
    }

    pub fn is_critical(&self) -> bool {
        self.context.severity == Severity::Critical
    }

    /// Backoff before retry number `attempt` (0-based): `delay × 2^attempt × multiplier`
    pub fn retry_delay(&self, attempt: u32, multiplier: f64) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let millis = self.context.retry_delay_ms.saturating_mul(factor) as f64 * multiplier.max(0.0);
        Duration::from_millis(millis.round() as u64)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.context.data.get(key).and_then(Value::as_str)
    }
}
