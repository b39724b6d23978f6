//! Build pipeline orchestrator - fans a run out over platform × environment

use crate::analysis::{PerformanceRegression, RegressionAnalyzer, RECENT_REGRESSIONS};
use crate::core::config::{is_valid_identifier, BuildPipelineConfig};
use crate::core::{
    BuildContext, BuildResult, BuildStep, BundleAnalysisStep, BundleBuildStep, CacheWarmStep,
    EnvironmentInfo, GitInfo, PerformanceBenchmarkStep, PipelineRun, PipelineStatus, RunStatus,
};
use crate::error::{Degradation, DegradationMode, ErrorHandler, ErrorScope, Handled, PipelineError};
use crate::execution::StepExecutor;
use crate::persistence::{BuildReport, HistoryStore, JsonHistoryStore, ReportWriter};
use crate::services::BuildServices;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// File name used when build history is redirected to the fallback directory
pub const FALLBACK_HISTORY_FILE: &str = "build-history.json";

/// Events published to subscribers
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Initialized {
        platforms: Vec<String>,
        environments: Vec<String>,
        ci_provider: Option<String>,
    },
    Completed {
        build_id: String,
        degraded: bool,
        successful: usize,
        failed: usize,
    },
    Failed {
        build_id: String,
        error: String,
    },
    RegressionDetected {
        build_id: String,
        regressions: Vec<PerformanceRegression>,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Initialized { .. } => "pipeline-initialized",
            PipelineEvent::Completed { .. } => "pipeline-completed",
            PipelineEvent::Failed { .. } => "pipeline-failed",
            PipelineEvent::RegressionDetected { .. } => "pipeline-regression-detected",
        }
    }
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Errors returned by the orchestrator API
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("A build is already running")]
    AlreadyRunning,

    #[error("Pipeline is not ready (status: {0:?})")]
    NotReady(PipelineStatus),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// What to build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Platforms to build; the configured ones when `None`
    pub platforms: Option<Vec<String>>,
    /// Environments to build; the configured ones when `None`
    pub environments: Option<Vec<String>>,
    pub project_root: PathBuf,
    pub skip_benchmark: bool,
}

impl BuildOptions {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            platforms: None,
            environments: None,
            project_root: project_root.into(),
            skip_benchmark: false,
        }
    }

    pub fn platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = Some(platforms.into_iter().map(Into::into).collect());
        self
    }

    pub fn environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments = Some(environments.into_iter().map(Into::into).collect());
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the single-flight flag on every exit path of a run
struct RunGuard<'a> {
    pipeline: &'a BuildPipeline,
}

impl<'a> RunGuard<'a> {
    fn acquire(pipeline: &'a BuildPipeline) -> Option<Self> {
        pipeline
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { pipeline })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut status = lock(&self.pipeline.status);
        if *status == PipelineStatus::Running {
            *status = PipelineStatus::Ready;
        }
        self.pipeline.running.store(false, Ordering::Release);
    }
}

/// The build pipeline orchestrator
pub struct BuildPipeline {
    defaults: BuildPipelineConfig,
    config: tokio::sync::RwLock<BuildPipelineConfig>,
    status: Mutex<PipelineStatus>,
    running: AtomicBool,
    handler: RwLock<Arc<ErrorHandler>>,
    services: BuildServices,
    store: Arc<dyn HistoryStore>,
    history: tokio::sync::RwLock<Vec<BuildResult>>,
    analyzer: Mutex<RegressionAnalyzer>,
    event_handlers: Mutex<Vec<EventHandler>>,
}

impl BuildPipeline {
    /// `defaults` is the configuration overrides are merged into on initialize
    pub fn new(
        defaults: BuildPipelineConfig,
        services: BuildServices,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            config: tokio::sync::RwLock::new(defaults.clone()),
            status: Mutex::new(PipelineStatus::Idle),
            running: AtomicBool::new(false),
            handler: RwLock::new(Arc::new(ErrorHandler::new(defaults.error_handling.clone()))),
            services,
            store,
            history: tokio::sync::RwLock::new(Vec::new()),
            analyzer: Mutex::new(RegressionAnalyzer::new(defaults.regression.clone())),
            event_handlers: Mutex::new(Vec::new()),
            defaults,
        }
    }

    /// Add an event handler
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        lock(&self.event_handlers).push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit(&self, event: PipelineEvent) {
        debug!("Emitting {}", event.name());
        let handlers: Vec<EventHandler> = lock(&self.event_handlers).clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    pub fn status(&self) -> PipelineStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: PipelineStatus) {
        *lock(&self.status) = status;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn config(&self) -> BuildPipelineConfig {
        self.config.read().await.clone()
    }

    pub fn error_handler(&self) -> Arc<ErrorHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn history(&self) -> Vec<BuildResult> {
        self.history.read().await.clone()
    }

    /// Every regression detected since the pipeline was created
    pub fn regressions(&self) -> Vec<PerformanceRegression> {
        lock(&self.analyzer).regressions().to_vec()
    }

    /// Merge `overrides` into the defaults, load history and prepare CI.
    ///
    /// A disabled pipeline stays idle.
    pub async fn initialize(&self, overrides: &Value) -> Result<(), BuildError> {
        let config = self.defaults.with_overrides(overrides)?;
        if !config.enabled {
            info!("Build pipeline is disabled; skipping initialization");
            *self.config.write().await = config;
            return Ok(());
        }

        self.set_status(PipelineStatus::Initializing);
        info!("Initializing build pipeline");

        let handler = Arc::new(ErrorHandler::new(config.error_handling.clone()));
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler.clone();
        lock(&self.analyzer).set_config(config.regression.clone());

        let store = &self.store;
        let loaded = handler
            .execute(&ErrorScope::new("load-history"), None, move || async move {
                store.load().await
            })
            .await;
        let history = match loaded {
            Ok(handled) => handled.into_value().unwrap_or_else(|| {
                warn!("Build history unavailable; starting with an empty history");
                Vec::new()
            }),
            Err(e) => {
                self.set_status(PipelineStatus::Idle);
                return Err(e.into());
            }
        };
        info!("Loaded {} build history entries", history.len());
        *self.history.write().await = history;

        let ci_provider = if config.ci.enabled {
            self.prepare_ci(&config, &handler).await
        } else {
            None
        };

        let event = PipelineEvent::Initialized {
            platforms: config.platforms.clone(),
            environments: config.environments.clone(),
            ci_provider,
        };
        *self.config.write().await = config;
        self.set_status(PipelineStatus::Ready);
        self.emit(event);
        Ok(())
    }

    async fn prepare_ci(&self, config: &BuildPipelineConfig, handler: &ErrorHandler) -> Option<String> {
        let detected = detect_ci_provider().map(str::to_string);
        let provider = config.ci.provider.clone().or_else(|| detected.clone());

        if let (Some(configured), Some(detected)) = (&config.ci.provider, &detected) {
            if configured != detected {
                warn!("Configured CI provider {} but running under {}", configured, detected);
            }
        }

        let problem = if config.ci.branches.is_empty() {
            Some("CI integration is enabled but no branches are configured")
        } else if !config.ci.on_push && !config.ci.on_pull_request {
            Some("CI integration is enabled but neither push nor pull request triggers are")
        } else {
            None
        };
        if let Some(message) = problem {
            let error = PipelineError::ci(provider.as_deref().unwrap_or("unknown"), message);
            if let Err(e) = handler.handle_error(error, &ErrorScope::new("prepare-ci")).await {
                warn!("CI integration disabled: {}", e);
                return None;
            }
        }

        match &provider {
            Some(name) => info!("CI integration prepared for {}", name),
            None => info!("CI integration enabled; no CI provider detected"),
        }
        provider
    }

    /// Run every requested platform × environment combination.
    ///
    /// Rejects immediately with [`BuildError::AlreadyRunning`] while another
    /// run is in flight.
    pub async fn execute_build(&self, options: BuildOptions) -> Result<PipelineRun, BuildError> {
        let _guard = RunGuard::acquire(self).ok_or_else(|| {
            warn!("Rejecting build request: a build is already running");
            BuildError::AlreadyRunning
        })?;

        let status = self.status();
        if status != PipelineStatus::Ready {
            return Err(BuildError::NotReady(status));
        }
        self.set_status(PipelineStatus::Running);

        let config = self.config().await;
        let handler = self.error_handler();
        let git = GitInfo::collect(&options.project_root).await;
        let base = BuildContext::new(config, EnvironmentInfo::detect(&options.project_root), git);

        match self.run(&base, &options, &handler).await {
            Ok(run) => Ok(run),
            Err(e) => {
                handler.last_chance(&e).await;
                self.emit(PipelineEvent::Failed {
                    build_id: base.build_id.clone(),
                    error: e.to_string(),
                });
                Err(BuildError::Pipeline(e))
            }
        }
    }

    async fn run(
        &self,
        base: &BuildContext,
        options: &BuildOptions,
        handler: &Arc<ErrorHandler>,
    ) -> Result<PipelineRun, PipelineError> {
        let config = &base.config;
        let platforms = options.platforms.clone().unwrap_or_else(|| config.platforms.clone());
        let environments = options
            .environments
            .clone()
            .unwrap_or_else(|| config.environments.clone());
        validate_targets(&platforms, &environments)?;

        let build_id = base.build_id.clone();
        let scope = ErrorScope::new("build").with_build(&build_id);
        let started_at = Utc::now();
        let started = Instant::now();

        let combinations: Vec<(String, String)> = platforms
            .iter()
            .flat_map(|p| environments.iter().map(move |e| (p.clone(), e.clone())))
            .collect();
        info!(
            "Starting build {} ({} combinations, branch {})",
            build_id,
            combinations.len(),
            base.git.branch
        );

        let mut tasks = JoinSet::new();
        for (platform, environment) in &combinations {
            let executor = StepExecutor::new(handler.clone());
            let steps = self.combination_steps(config, platform, environment);
            let context = base.for_combination(platform, environment);
            tasks.spawn(run_combination(executor, steps, context));
        }

        let mut results = Vec::with_capacity(combinations.len());
        let mut last_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((result, error)) => {
                    if error.is_some() {
                        last_error = error;
                    }
                    results.push(result);
                }
                Err(e) => error!("Build task did not complete: {}", e),
            }
        }

        // A task that panicked left no result behind
        for (platform, environment) in &combinations {
            let present = results
                .iter()
                .any(|r: &BuildResult| &r.platform == platform && &r.environment == environment);
            if !present {
                results.push(BuildResult::synthetic_failure(
                    &build_id,
                    platform,
                    environment,
                    &base.git,
                    started_at,
                    format!("Build task for {}/{} did not complete", platform, environment),
                    false,
                ));
            }
        }
        results.sort_by_key(|r| {
            combinations
                .iter()
                .position(|(p, e)| p == &r.platform && e == &r.environment)
        });

        let successful: Vec<BuildResult> = results.iter().filter(|r| r.success).cloned().collect();
        let failed = results.len() - successful.len();

        let benchmark = if config.benchmarking.enabled && !options.skip_benchmark && !successful.is_empty() {
            let step = PerformanceBenchmarkStep::new(successful.clone(), config);
            let executor = StepExecutor::new(handler.clone());
            settle(executor.execute(&step, base, &scope).await, step.name())
        } else {
            None
        };

        let history_snapshot = {
            let mut history = self.history.write().await;
            history.extend(results.iter().cloned());
            history.clone()
        };

        let regressions = if config.regression.enabled && !successful.is_empty() {
            lock(&self.analyzer).analyze(&history_snapshot, config.regression.analysis_window)
        } else {
            Vec::new()
        };
        if !regressions.is_empty() && config.regression.alert_on_regression {
            self.emit(PipelineEvent::RegressionDetected {
                build_id: build_id.clone(),
                regressions: regressions.clone(),
            });
        }

        let writer = ReportWriter::new(
            &config.artifacts.reports_dir,
            config.artifacts.retention_days,
            config.artifacts.max_reports,
        );
        let (recent, total_regressions) = {
            let analyzer = lock(&self.analyzer);
            (analyzer.recent(RECENT_REGRESSIONS).to_vec(), analyzer.regressions().len())
        };
        let report = BuildReport::new(&build_id, results.clone(), recent, total_regressions);
        let report_path = {
            let (writer, report) = (&writer, &report);
            let outcome = handler
                .execute(&scope.for_operation("write-report"), None, move || async move {
                    writer.write(report).await.map_err(anyhow::Error::from)
                })
                .await;
            match fallback_dir(&outcome) {
                Some(dir) => {
                    let fallback = ReportWriter::new(
                        dir,
                        config.artifacts.retention_days,
                        config.artifacts.max_reports,
                    );
                    match fallback.write(report).await {
                        Ok(path) => Some(path),
                        Err(e) => {
                            warn!("write-report failed at fallback path: {}", e);
                            None
                        }
                    }
                }
                None => settle(outcome, "write-report"),
            }
        };

        let store = &self.store;
        let history = &history_snapshot;
        let outcome = handler
            .execute(&scope.for_operation("save-history"), None, move || async move {
                store.save(history).await
            })
            .await;
        match fallback_dir(&outcome) {
            Some(dir) => {
                let path = dir.join(FALLBACK_HISTORY_FILE);
                match JsonHistoryStore::new(&path).save(history).await {
                    Ok(()) => info!("Build history saved to fallback path {}", path.display()),
                    Err(e) => warn!("save-history failed at fallback path {}: {}", path.display(), e),
                }
            }
            None => {
                settle(outcome, "save-history");
            }
        }

        let writer = &writer;
        settle(
            handler
                .execute(&scope.for_operation("prune-reports"), None, move || async move {
                    writer.prune().await.map_err(anyhow::Error::from)
                })
                .await,
            "prune-reports",
        );

        if handler.stats().total_errors > 0 {
            if let Err(e) = handler.generate_report().await {
                warn!("Could not write error report: {}", e);
            }
        }

        if successful.is_empty() {
            let mut error = PipelineError::build_step(
                "build",
                format!("All {} builds failed", results.len()),
            )
            .with_recoverable(false)
            .with_retry_policy(false, 0, 0)
            .with_data("build_id", build_id.as_str());
            if let Some(last) = last_error {
                error = error.with_suggestions(last.context.recovery_suggestions);
            }
            return Err(error.with_scope(&scope));
        }

        let status = if failed == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Degraded
        };
        info!(
            "Build {} {:?}: {} succeeded, {} failed in {}ms",
            build_id,
            status,
            successful.len(),
            failed,
            started.elapsed().as_millis()
        );
        self.emit(PipelineEvent::Completed {
            build_id: build_id.clone(),
            degraded: status == RunStatus::Degraded,
            successful: successful.len(),
            failed,
        });

        Ok(PipelineRun {
            build_id,
            status,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            results,
            regressions,
            benchmark,
            report_path,
        })
    }

    fn combination_steps(
        &self,
        config: &BuildPipelineConfig,
        platform: &str,
        environment: &str,
    ) -> Vec<Box<dyn BuildStep>> {
        vec![
            Box::new(CacheWarmStep::new(self.services.cache.clone(), config)),
            Box::new(BundleBuildStep::new(
                platform,
                environment,
                self.services.bundler.clone(),
                self.services.telemetry.clone(),
                config,
            )),
            Box::new(BundleAnalysisStep::new(config)),
        ]
    }

    /// Analyze the last `count` history entries for regressions
    pub async fn analyze_regressions(&self, count: usize) -> Vec<PerformanceRegression> {
        let history = self.history.read().await;
        lock(&self.analyzer).analyze(&history, count)
    }
}

/// Runs one combination and turns any failure into a failed result
async fn run_combination(
    executor: StepExecutor,
    steps: Vec<Box<dyn BuildStep>>,
    mut context: BuildContext,
) -> (BuildResult, Option<PipelineError>) {
    let started_at = Utc::now();
    let platform = context.platform.clone().unwrap_or_default();
    let environment = context.target_environment.clone().unwrap_or_default();
    let scope = ErrorScope::new("combination")
        .with_build(&context.build_id)
        .with_combination(&platform, &environment);

    let outcome = executor.run_steps(&steps, &mut context, &scope).await;

    if let Some(error) = outcome.fatal {
        warn!("Build for {}/{} failed: {}", platform, environment, error);
        let result = BuildResult::synthetic_failure(
            &context.build_id,
            &platform,
            &environment,
            &context.git,
            started_at,
            error.to_string(),
            error.is_recoverable(),
        );
        return (result, Some(error));
    }

    let error = if outcome.failed {
        outcome.degradations.last().map(|d| d.error.clone())
    } else {
        None
    };
    let mut result = BuildResult::from_context(
        &context,
        started_at,
        !outcome.failed,
        outcome.warnings,
        outcome.errors,
    );
    if outcome.failed {
        result.degraded = true;
        result.warnings.push(format!(
            "Build for {}/{} failed and was handled in degraded mode",
            platform, environment
        ));
    }
    (result, error)
}

/// Directory a failed file operation was redirected to, if it was
fn fallback_dir<T>(outcome: &Result<Handled<T>, PipelineError>) -> Option<PathBuf> {
    match outcome {
        Ok(Handled::Degraded(Degradation {
            mode: DegradationMode::FallbackPath(path),
            ..
        })) => Some(path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone())),
        _ => None,
    }
}

/// Value of a handled post-run operation; failures only warn
fn settle<T>(outcome: Result<Handled<T>, PipelineError>, operation: &str) -> Option<T> {
    match outcome {
        Ok(Handled::Degraded(degradation)) => {
            warn!("{} degraded: {}", operation, degradation.describe());
            None
        }
        Ok(handled) => handled.into_value(),
        Err(e) => {
            warn!("{} failed: {}", operation, e);
            None
        }
    }
}

fn validate_targets(platforms: &[String], environments: &[String]) -> Result<(), PipelineError> {
    if platforms.is_empty() || environments.is_empty() {
        return Err(PipelineError::configuration(
            "At least one platform and one environment are required",
        ));
    }
    if let Some(name) = platforms
        .iter()
        .chain(environments.iter())
        .find(|name| !is_valid_identifier(name))
    {
        return Err(PipelineError::configuration(format!(
            "Invalid platform/environment name: '{}'",
            name
        )));
    }
    Ok(())
}

/// CI provider the process is running under, from well-known variables
pub fn detect_ci_provider() -> Option<&'static str> {
    let set = |name: &str| std::env::var_os(name).is_some();
    if set("GITHUB_ACTIONS") {
        Some("github")
    } else if set("GITLAB_CI") {
        Some("gitlab")
    } else if set("CIRCLECI") {
        Some("circleci")
    } else if set("CI") {
        Some("generic")
    } else {
        None
    }
}
