//! Error handler - retry with backoff, recovery and graceful degradation
//!
//! Every step, history load/save and report write goes through
//! [`ErrorHandler::execute`]. The handler retries while the error's own policy
//! allows it, then tries the kind's recovery routine (re-invoking the
//! operation once on success), then falls back to the kind's degradation
//! strategy. Only errors that survive all three are returned to the caller.

use crate::core::config::ErrorHandlingConfig;
use crate::error::recovery::{
    degradation_strategy, fallback_path, recovery_strategy, run_recovery, DegradationStrategy,
    RecoveryStrategy,
};
use crate::error::{ErrorHandlingStats, ErrorKind, PipelineError};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Where an operation runs, used to tag errors it raises
#[derive(Debug, Clone, Default)]
pub struct ErrorScope {
    pub operation: String,
    pub build_id: Option<String>,
    pub platform: Option<String>,
    pub environment: Option<String>,
}

impl ErrorScope {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_build(mut self, build_id: &str) -> Self {
        self.build_id = Some(build_id.to_string());
        self
    }

    pub fn with_combination(mut self, platform: &str, environment: &str) -> Self {
        self.platform = Some(platform.to_string());
        self.environment = Some(environment.to_string());
        self
    }

    /// Same correlation, different operation
    pub fn for_operation(&self, operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..self.clone()
        }
    }
}

/// The safe substitute chosen for a failed operation
#[derive(Debug, Clone, PartialEq)]
pub enum DegradationMode {
    /// Continue without remote access
    OfflineMode,
    /// Redirect file output to this path
    FallbackPath(PathBuf),
    /// Skip this platform; other platforms proceed
    PlatformSkipped(String),
    /// Skip this dependency; continue with what is available
    DependencySkipped(String),
    /// Retained memory was released
    MemoryReleased,
}

#[derive(Debug, Clone)]
pub struct Degradation {
    pub mode: DegradationMode,
    pub error: PipelineError,
}

impl Degradation {
    pub fn skips_platform(&self) -> bool {
        matches!(self.mode, DegradationMode::PlatformSkipped(_))
    }

    pub fn describe(&self) -> String {
        match &self.mode {
            DegradationMode::OfflineMode => format!("continuing in offline mode ({})", self.error),
            DegradationMode::FallbackPath(path) => {
                format!("redirected to fallback path {} ({})", path.display(), self.error)
            }
            DegradationMode::PlatformSkipped(platform) => {
                format!("platform {} skipped ({})", platform, self.error)
            }
            DegradationMode::DependencySkipped(dependency) => {
                format!("dependency {} skipped ({})", dependency, self.error)
            }
            DegradationMode::MemoryReleased => format!("memory released ({})", self.error),
        }
    }
}

/// Outcome of a handled operation
#[derive(Debug, Clone)]
pub enum Handled<T> {
    /// Succeeded, possibly after retries
    Success(T),
    /// Succeeded when re-invoked after a recovery routine
    Recovered(T),
    /// Did not succeed; a safe substitute was chosen
    Degraded(Degradation),
}

impl<T> Handled<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Handled::Success(value) | Handled::Recovered(value) => Some(value),
            Handled::Degraded(_) => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Handled::Degraded(_))
    }
}

#[derive(Serialize)]
struct ErrorReport<'a> {
    generated_at: chrono::DateTime<Utc>,
    stats: ErrorHandlingStats,
    config: &'a ErrorHandlingConfig,
    recommendations: Vec<String>,
    errors: Vec<PipelineError>,
}

pub struct ErrorHandler {
    config: ErrorHandlingConfig,
    stats: Mutex<ErrorHandlingStats>,
    errors: Mutex<Vec<PipelineError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlingConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(ErrorHandlingStats::default()),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ErrorHandlingConfig {
        &self.config
    }

    pub fn stats(&self) -> ErrorHandlingStats {
        lock(&self.stats).clone()
    }

    pub fn errors(&self) -> Vec<PipelineError> {
        lock(&self.errors).clone()
    }

    pub fn reset(&self) {
        lock(&self.stats).reset();
        lock(&self.errors).clear();
    }

    /// Delay before retry number `attempt` for this error
    pub fn backoff_delay(&self, error: &PipelineError, attempt: u32) -> Duration {
        error.retry_delay(attempt, self.config.global_retry_delay_multiplier)
    }

    /// Run `operation` with retries, recovery and degradation.
    ///
    /// `max_retries` overrides the retry budget; without it the budget is the
    /// error's own `max_retries`. Errors lifted from foreign types carry no
    /// policy of their own and get `max_global_retries`.
    ///
    /// A handled operation counts as one error in the statistics, however
    /// many attempts it took; intermediate failures count as retries.
    pub async fn execute<T, F, Fut>(
        &self,
        scope: &ErrorScope,
        max_retries: Option<u32>,
        mut operation: F,
    ) -> Result<Handled<T>, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let mut failure = loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} retries", scope.operation, attempt);
                    }
                    return Ok(Handled::Success(value));
                }
                Err(e) => {
                    let lifted = e.downcast_ref::<PipelineError>().is_none();
                    let mut error = PipelineError::classify(e).with_scope(scope);
                    if lifted {
                        error.context.max_retries = self.config.max_global_retries;
                    }

                    let limit = max_retries.unwrap_or(error.context.max_retries);
                    if attempt < limit && error.context.should_retry && error.context.recoverable {
                        let delay = self.backoff_delay(&error, attempt);
                        warn!(
                            "{} failed (attempt {}/{}): {}; retrying in {:?}",
                            scope.operation,
                            attempt + 1,
                            limit + 1,
                            error,
                            delay
                        );
                        lock(&self.stats).record_retry();
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    break error;
                }
            }
        };
        self.record(&failure);

        if self.try_recover(&failure).await {
            match operation().await {
                Ok(value) => {
                    lock(&self.stats).record_recovery(started.elapsed());
                    info!("{} recovered from {}", scope.operation, failure.kind);
                    return Ok(Handled::Recovered(value));
                }
                Err(e) => {
                    let error = PipelineError::classify(e).with_scope(scope);
                    debug!("{} failed again after recovery: {}", scope.operation, error);
                    failure = error;
                }
            }
        }

        self.degrade_or_fail(failure).await
    }

    /// Recovery and degradation for an error with no operation to re-invoke
    pub async fn handle_error(
        &self,
        error: PipelineError,
        scope: &ErrorScope,
    ) -> Result<Handled<()>, PipelineError> {
        let started = Instant::now();
        let error = error.with_scope(scope);
        self.record(&error);

        if self.try_recover(&error).await {
            lock(&self.stats).record_recovery(started.elapsed());
            return Ok(Handled::Recovered(()));
        }

        self.degrade_or_fail(error).await
    }

    /// Final recovery attempt for an error about to leave the pipeline
    pub async fn last_chance(&self, error: &PipelineError) -> bool {
        self.record(error);
        let recovered = self.try_recover(error).await;
        if recovered {
            info!("Top-level {} recovered; the run still reports it", error.kind);
        } else {
            error!("Unrecoverable pipeline error: {}", error);
            for suggestion in &error.context.recovery_suggestions {
                error!("  suggestion: {}", suggestion);
            }
        }
        recovered
    }

    fn record(&self, error: &PipelineError) {
        lock(&self.stats).record_error(error.kind, error.severity());

        let mut errors = lock(&self.errors);
        errors.push(error.clone());
        if errors.len() > self.config.max_retained_errors {
            let excess = errors.len() - self.config.max_retained_errors;
            errors.drain(..excess);
        }
    }

    async fn try_recover(&self, error: &PipelineError) -> bool {
        if !self.config.enable_auto_recovery || !error.is_recoverable() {
            return false;
        }
        let strategy = match recovery_strategy(error.kind) {
            Some(strategy) => strategy,
            None => return false,
        };

        debug!("Attempting {:?} recovery for {}", strategy, error.kind);
        let routine = async {
            if strategy == RecoveryStrategy::ReleaseMemory {
                self.release_memory();
            }
            run_recovery(strategy, error).await
        };

        match tokio::time::timeout(Duration::from_millis(self.config.recovery_timeout_ms), routine).await {
            Ok(recovered) => recovered,
            Err(_) => {
                warn!(
                    "Recovery for {} timed out after {}ms",
                    error.kind, self.config.recovery_timeout_ms
                );
                false
            }
        }
    }

    async fn degrade_or_fail<T>(&self, error: PipelineError) -> Result<Handled<T>, PipelineError> {
        match self.degrade(&error).await {
            Some(degradation) => {
                lock(&self.stats).record_degradation();
                warn!("Degraded: {}", degradation.describe());
                Ok(Handled::Degraded(degradation))
            }
            None => {
                if error.is_critical() {
                    lock(&self.stats).record_critical_failure();
                }
                error!("{}", error);
                Err(error)
            }
        }
    }

    async fn degrade(&self, error: &PipelineError) -> Option<Degradation> {
        if !self.config.enable_graceful_degradation
            || !self.config.continue_on_non_critical
            || error.is_critical()
        {
            return None;
        }

        let mode = match degradation_strategy(error.kind)? {
            DegradationStrategy::OfflineMode => DegradationMode::OfflineMode,
            DegradationStrategy::FallbackPath => {
                if let Err(e) = tokio::fs::create_dir_all(&self.config.fallback_dir).await {
                    warn!(
                        "Fallback directory {} unavailable: {}",
                        self.config.fallback_dir.display(),
                        e
                    );
                    return None;
                }
                DegradationMode::FallbackPath(fallback_path(&self.config.fallback_dir, error))
            }
            DegradationStrategy::SkipPlatform => DegradationMode::PlatformSkipped(
                error
                    .context
                    .platform
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            DegradationStrategy::SkipDependency => DegradationMode::DependencySkipped(
                error.data_str("dependency").unwrap_or("unknown").to_string(),
            ),
            DegradationStrategy::ReleaseMemory => {
                self.release_memory();
                DegradationMode::MemoryReleased
            }
        };

        Some(Degradation {
            mode,
            error: error.clone(),
        })
    }

    /// Drop the older half of the retained error log
    fn release_memory(&self) {
        let mut errors = lock(&self.errors);
        let keep = self.config.max_retained_errors / 2;
        if errors.len() > keep {
            let excess = errors.len() - keep;
            errors.drain(..excess);
        }
        errors.shrink_to_fit();
        info!("Released retained error history ({} entries kept)", errors.len());
    }

    /// Recommendations derived from the error histogram
    pub fn recommendations(&self) -> Vec<String> {
        let stats = self.stats();
        let mut recommendations: Vec<String> = stats
            .errors_by_type
            .iter()
            .filter(|(_, count)| **count > self.config.recommendation_threshold)
            .map(|(kind, count)| format!("{} ({} occurrences)", recommendation_for(*kind), count))
            .collect();

        if stats.critical_failures > 0 {
            recommendations.push(format!(
                "{} critical failures: review the error report before the next release build",
                stats.critical_failures
            ));
        }
        recommendations
    }

    /// Write statistics, configuration and the error log to a dated report
    pub async fn generate_report(&self) -> Result<PathBuf, PipelineError> {
        let report = ErrorReport {
            generated_at: Utc::now(),
            stats: self.stats(),
            config: &self.config,
            recommendations: self.recommendations(),
            errors: self.errors(),
        };

        let dir = &self.config.reports_dir;
        let path = dir.join(format!("error-report-{}.json", report.generated_at.format("%Y-%m-%d")));

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::file_system(dir, "create_dir", e.to_string()))?;
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| PipelineError::build_step("error-report", e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| PipelineError::file_system(&path, "write", e.to_string()))?;

        info!(
            "Error handling summary: {} errors, {} retried, {} recovered, {} degraded, {} critical",
            report.stats.total_errors,
            report.stats.retried_operations,
            report.stats.recovered_errors,
            report.stats.degraded_operations,
            report.stats.critical_failures
        );
        for (kind, count) in &report.stats.errors_by_type {
            info!("  {}: {}", kind, count);
        }
        for recommendation in &report.recommendations {
            warn!("Recommendation: {}", recommendation);
        }
        info!("Error report written to {}", path.display());

        Ok(path)
    }
}

fn recommendation_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Network => "Recurring NetworkError: consider an offline-first design with cached dependencies",
        ErrorKind::FileSystem => "Recurring FileSystemError: check disk space and permissions of build directories",
        ErrorKind::BuildStep => "Recurring BuildStepError: review step configuration and timeouts",
        ErrorKind::PlatformBuild => "Recurring PlatformBuildError: verify platform toolchains on the build host",
        ErrorKind::Dependency => "Recurring DependencyError: pin dependency versions and commit a lockfile",
        ErrorKind::Timeout => "Recurring TimeoutError: raise step timeouts or split long-running steps",
        ErrorKind::ResourceConstraint => "Recurring ResourceConstraintError: reduce build concurrency or add memory",
        ErrorKind::Configuration => "Recurring ConfigurationError: validate configuration before running builds",
        ErrorKind::PerformanceRegression => "Recurring PerformanceRegressionError: enforce performance budgets in review",
        ErrorKind::Ci => "Recurring CIError: check CI provider credentials and trigger settings",
    }
}
