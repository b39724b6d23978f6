//! Build step domain model
//!
//! A step is one unit of build work run against a combination's
//! [`BuildContext`]. Steps only read the context; the executor merges the
//! artifacts and metrics of each [`StepResult`] back into it so later steps
//! can see what earlier ones produced.

use crate::core::config::{BenchmarkConfig, BuildPipelineConfig};
use crate::core::context::BuildContext;
use crate::core::state::{
    BuildResult, StepResult, BUILD_TIME_METRIC, BUNDLE_SIZE_METRIC, MEMORY_USAGE_METRIC,
};
use crate::error::PipelineError;
use crate::services::{BundleRequest, Bundler, CacheService, TelemetrySink};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const BUNDLE_ARTIFACT: &str = "bundle";
pub const ANALYSIS_ARTIFACT: &str = "analysis";

/// A single unit of build work
#[async_trait]
pub trait BuildStep: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn enabled(&self) -> bool {
        true
    }

    /// Upper bound for a single attempt
    fn timeout(&self) -> Duration;

    /// Retry budget handed to the error handler
    fn retries(&self) -> u32;

    /// Whether the remaining steps still run when this one fails
    fn continue_on_failure(&self) -> bool;

    async fn execute(&self, context: &BuildContext) -> anyhow::Result<StepResult>;
}

/// Warms the build cache before bundling
pub struct CacheWarmStep {
    cache: Arc<dyn CacheService>,
    enabled: bool,
    timeout: Duration,
}

impl CacheWarmStep {
    pub fn new(cache: Arc<dyn CacheService>, config: &BuildPipelineConfig) -> Self {
        Self {
            cache,
            enabled: config.optimization.cache_warming,
            timeout: Duration::from_secs(config.steps.cache_warm_timeout_secs),
        }
    }
}

#[async_trait]
impl BuildStep for CacheWarmStep {
    fn name(&self) -> &str {
        "cache-warm"
    }

    fn description(&self) -> &str {
        "Warm the build cache"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn retries(&self) -> u32 {
        1
    }

    fn continue_on_failure(&self) -> bool {
        true
    }

    async fn execute(&self, _context: &BuildContext) -> anyhow::Result<StepResult> {
        let started = Instant::now();
        self.cache.warm_cache().await?;
        let stats = self.cache.stats();

        Ok(StepResult::success(
            self.name(),
            format!("Cache warmed: {} entries, {} bytes", stats.entries, stats.size),
        )
        .with_metric("cache_entries", stats.entries as f64)
        .with_metric("cache_size", stats.size as f64)
        .with_metric("cache_hit_rate", stats.hit_rate)
        .with_duration(started.elapsed()))
    }
}

/// Open telemetry monitoring entry; dropping it ends the monitoring, also
/// when a timeout abandons the step mid-bundle
struct Monitoring<'a> {
    telemetry: &'a dyn TelemetrySink,
    id: String,
    bundle_size: u64,
}

impl<'a> Monitoring<'a> {
    fn start(telemetry: &'a dyn TelemetrySink, id: String, platform: &str, environment: &str) -> Self {
        telemetry.start_build_monitoring(&id, platform, environment);
        Self {
            telemetry,
            id,
            bundle_size: 0,
        }
    }
}

impl Drop for Monitoring<'_> {
    fn drop(&mut self) {
        self.telemetry.end_build_monitoring(&self.id, self.bundle_size);
    }
}

/// Invokes the bundler for one platform/environment
pub struct BundleBuildStep {
    platform: String,
    environment: String,
    bundler: Arc<dyn Bundler>,
    telemetry: Arc<dyn TelemetrySink>,
    timeout: Duration,
    retries: u32,
}

impl BundleBuildStep {
    pub fn new(
        platform: &str,
        environment: &str,
        bundler: Arc<dyn Bundler>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &BuildPipelineConfig,
    ) -> Self {
        Self {
            platform: platform.to_string(),
            environment: environment.to_string(),
            bundler,
            telemetry,
            timeout: Duration::from_secs(config.steps.bundle_timeout_secs),
            retries: config.steps.bundle_retries,
        }
    }
}

#[async_trait]
impl BuildStep for BundleBuildStep {
    fn name(&self) -> &str {
        "bundle-build"
    }

    fn description(&self) -> &str {
        "Build the application bundle"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn retries(&self) -> u32 {
        self.retries
    }

    fn continue_on_failure(&self) -> bool {
        false
    }

    async fn execute(&self, context: &BuildContext) -> anyhow::Result<StepResult> {
        let monitoring_id = context.combination_id();
        let request = BundleRequest {
            build_id: context.build_id.clone(),
            platform: self.platform.clone(),
            environment: self.environment.clone(),
            output_path: context.bundle_output_path(),
            project_root: context.environment.project_root.clone(),
        };

        info!("Bundling {}/{}", self.platform, self.environment);
        let mut monitoring = Monitoring::start(
            self.telemetry.as_ref(),
            monitoring_id,
            &self.platform,
            &self.environment,
        );
        let started = Instant::now();

        let output = self.bundler.bundle(&request).await?;
        let elapsed = started.elapsed();
        monitoring.bundle_size = output.bundle_size;
        drop(monitoring);

        let warnings = output.warnings();
        let mut result = StepResult::success(self.name(), output.stdout.clone())
            .with_artifact(BUNDLE_ARTIFACT, output.bundle_path.display().to_string())
            .with_metric(BUNDLE_SIZE_METRIC, output.bundle_size as f64)
            .with_metric(BUILD_TIME_METRIC, elapsed.as_millis() as f64)
            .with_warnings(warnings)
            .with_duration(elapsed);
        if let Some(memory) = output.peak_memory_bytes {
            result = result.with_metric(MEMORY_USAGE_METRIC, memory as f64);
        }
        Ok(result)
    }
}

#[derive(Debug, Serialize)]
struct BundleAnalysis<'a> {
    bundle: &'a str,
    size_bytes: u64,
    size_kb: f64,
    budget_bytes: Option<u64>,
    over_budget_percent: Option<f64>,
}

/// Size analysis of the bundle produced by [`BundleBuildStep`]
pub struct BundleAnalysisStep {
    enabled: bool,
    timeout: Duration,
    max_bundle_size: Option<u64>,
}

impl BundleAnalysisStep {
    pub fn new(config: &BuildPipelineConfig) -> Self {
        Self {
            enabled: config.optimization.bundle_analysis,
            timeout: Duration::from_secs(config.steps.analysis_timeout_secs),
            max_bundle_size: config.optimization.max_bundle_size,
        }
    }
}

#[async_trait]
impl BuildStep for BundleAnalysisStep {
    fn name(&self) -> &str {
        "bundle-analysis"
    }

    fn description(&self) -> &str {
        "Analyze the produced bundle against its size budget"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn retries(&self) -> u32 {
        0
    }

    fn continue_on_failure(&self) -> bool {
        true
    }

    async fn execute(&self, context: &BuildContext) -> anyhow::Result<StepResult> {
        let started = Instant::now();
        let bundle = context.artifact(BUNDLE_ARTIFACT).ok_or_else(|| {
            PipelineError::build_step(self.name(), "No bundle artifact to analyze")
                .with_retry_policy(false, 0, 0)
        })?;

        let metadata = tokio::fs::metadata(bundle)
            .await
            .map_err(|e| PipelineError::file_system(bundle, "stat", e.to_string()))?;
        let size = metadata.len();

        let over_budget = self
            .max_bundle_size
            .filter(|budget| size > *budget && *budget > 0)
            .map(|budget| (size - budget) as f64 / budget as f64 * 100.0);

        let analysis = BundleAnalysis {
            bundle,
            size_bytes: size,
            size_kb: size as f64 / 1024.0,
            budget_bytes: self.max_bundle_size,
            over_budget_percent: over_budget,
        };
        let report_path = format!("{}.analysis.json", bundle);
        let json = serde_json::to_string_pretty(&analysis)?;
        tokio::fs::write(&report_path, json)
            .await
            .map_err(|e| PipelineError::file_system(&report_path, "write", e.to_string()))?;
        debug!("Wrote bundle analysis to {}", report_path);

        let mut warnings = Vec::new();
        if let Some(percent) = over_budget {
            warnings.push(format!("Bundle exceeds size budget by {:.1}%", percent));
        }

        Ok(StepResult::success(
            self.name(),
            format!("Bundle {} is {:.1} KB", bundle, analysis.size_kb),
        )
        .with_artifact(ANALYSIS_ARTIFACT, report_path)
        .with_metric("bundle_size_kb", analysis.size_kb)
        .with_warnings(warnings)
        .with_duration(started.elapsed()))
    }
}

/// Benchmarks bundle load time across the successful builds of a run
pub struct PerformanceBenchmarkStep {
    results: Vec<BuildResult>,
    config: BenchmarkConfig,
    timeout: Duration,
}

impl PerformanceBenchmarkStep {
    pub fn new(results: Vec<BuildResult>, config: &BuildPipelineConfig) -> Self {
        Self {
            results,
            config: config.benchmarking.clone(),
            timeout: Duration::from_secs(config.steps.benchmark_timeout_secs),
        }
    }
}

#[async_trait]
impl BuildStep for PerformanceBenchmarkStep {
    fn name(&self) -> &str {
        "performance-benchmark"
    }

    fn description(&self) -> &str {
        "Benchmark bundle load time of successful builds"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn retries(&self) -> u32 {
        0
    }

    fn continue_on_failure(&self) -> bool {
        true
    }

    async fn execute(&self, _context: &BuildContext) -> anyhow::Result<StepResult> {
        let started = Instant::now();
        let mut result = StepResult::success(self.name(), String::new());
        let mut lines = Vec::new();

        for build in self.results.iter().filter(|r| r.success) {
            let bundle = match build.artifacts.get(BUNDLE_ARTIFACT) {
                Some(path) => path,
                None => continue,
            };

            for _ in 0..self.config.warmup_runs {
                tokio::fs::read(bundle)
                    .await
                    .map_err(|e| PipelineError::file_system(bundle, "read", e.to_string()))?;
            }

            let mut total = Duration::ZERO;
            for _ in 0..self.config.iterations {
                let sample = Instant::now();
                tokio::fs::read(bundle)
                    .await
                    .map_err(|e| PipelineError::file_system(bundle, "read", e.to_string()))?;
                total += sample.elapsed();
            }
            let mean_ms = total.as_secs_f64() * 1000.0 / self.config.iterations.max(1) as f64;

            let key = format!("{}/{}", build.platform, build.environment);
            result = result.with_metric(&format!("{}.load_ms", key), mean_ms);
            lines.push(format!("{}: {:.3}ms mean load time", key, mean_ms));
        }

        let successful: Vec<&BuildResult> = self.results.iter().filter(|r| r.success).collect();
        if !successful.is_empty() {
            let count = successful.len() as f64;
            let mean_build = successful.iter().map(|r| r.duration_ms as f64).sum::<f64>() / count;
            let mean_size = successful.iter().map(|r| r.bundle_size as f64).sum::<f64>() / count;
            result = result
                .with_metric("mean_build_time_ms", mean_build)
                .with_metric("mean_bundle_size", mean_size);
        }

        result.output = lines.join("\n");
        Ok(result.with_duration(started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BuildPipelineConfig;
    use crate::core::context::{EnvironmentInfo, GitInfo};
    use crate::services::{BundleOutput, TracingTelemetry};

    struct FixedBundler {
        size: u64,
    }

    #[async_trait]
    impl Bundler for FixedBundler {
        async fn bundle(&self, request: &BundleRequest) -> Result<crate::services::BundleOutput, PipelineError> {
            if let Some(parent) = request.output_path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&request.output_path, vec![b'x'; self.size as usize]).unwrap();
            Ok(BundleOutput {
                stdout: "warning: unused asset\n".to_string(),
                exit_code: 0,
                bundle_path: request.output_path.clone(),
                bundle_size: self.size,
                peak_memory_bytes: Some(4096),
            })
        }
    }

    fn context(root: &std::path::Path) -> BuildContext {
        BuildContext::new(
            BuildPipelineConfig::default(),
            EnvironmentInfo::detect(root),
            GitInfo::default(),
        )
        .for_combination("android", "production")
    }

    struct StalledBundler;

    #[async_trait]
    impl Bundler for StalledBundler {
        async fn bundle(&self, _request: &BundleRequest) -> Result<BundleOutput, PipelineError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(PipelineError::platform_build("android", "never finishes"))
        }
    }

    #[tokio::test]
    async fn test_timed_out_bundle_ends_monitoring() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let telemetry = Arc::new(TracingTelemetry::new());
        let step = BundleBuildStep::new(
            "android",
            "production",
            Arc::new(StalledBundler),
            telemetry.clone(),
            &BuildPipelineConfig::default(),
        );

        let outcome = tokio::time::timeout(Duration::from_millis(20), step.execute(&ctx)).await;
        assert!(outcome.is_err());
        assert_eq!(telemetry.active_builds(), 0);
    }

    #[tokio::test]
    async fn test_bundle_then_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BuildPipelineConfig::default();
        config.optimization.max_bundle_size = Some(100);
        let mut ctx = context(dir.path());

        let build = BundleBuildStep::new(
            "android",
            "production",
            Arc::new(FixedBundler { size: 150 }),
            Arc::new(TracingTelemetry::new()),
            &config,
        );
        let result = build.execute(&ctx).await.unwrap();
        assert_eq!(result.metrics[BUNDLE_SIZE_METRIC], 150.0);
        assert_eq!(result.metrics[MEMORY_USAGE_METRIC], 4096.0);
        assert_eq!(result.warnings, vec!["unused asset"]);
        ctx.merge(&result.artifacts, &result.metrics);

        let analysis = BundleAnalysisStep::new(&config).execute(&ctx).await.unwrap();
        assert!(analysis.warnings[0].contains("50.0%"));
        assert!(std::path::Path::new(&analysis.artifacts[ANALYSIS_ARTIFACT]).exists());
    }

    #[tokio::test]
    async fn test_analysis_without_bundle_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let step = BundleAnalysisStep::new(&BuildPipelineConfig::default());

        let err = step.execute(&context(dir.path())).await.unwrap_err();
        let err = PipelineError::classify(err);
        assert!(!err.context.should_retry);
    }

    #[tokio::test]
    async fn test_benchmark_measures_successful_builds() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("index.android.bundle");
        std::fs::write(&bundle, b"bundle").unwrap();

        let ctx = context(dir.path());
        let mut good = BuildResult::from_context(&ctx, chrono::Utc::now(), true, vec![], vec![]);
        good.artifacts
            .insert(BUNDLE_ARTIFACT.to_string(), bundle.display().to_string());
        let bad = BuildResult::synthetic_failure(
            &ctx.build_id,
            "ios",
            "production",
            &ctx.git,
            chrono::Utc::now(),
            "failed".to_string(),
            true,
        );

        let step = PerformanceBenchmarkStep::new(vec![good, bad], &BuildPipelineConfig::default());
        let result = step.execute(&ctx).await.unwrap();
        assert!(result.metrics.contains_key("android/production.load_ms"));
        assert!(!result.metrics.contains_key("ios/production.load_ms"));
        assert!(result.metrics.contains_key("mean_bundle_size"));
    }
}
