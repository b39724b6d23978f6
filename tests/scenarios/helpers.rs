//! Test utilities: mock collaborators and pipeline setup

use build_pipeline::core::context::GitInfo;
use build_pipeline::persistence::{HistoryStore, InMemoryHistoryStore};
use build_pipeline::services::{
    BundleOutput, BundleRequest, Bundler, CacheService, CacheStats, TelemetrySink,
};
use build_pipeline::{BuildPipeline, BuildPipelineConfig, BuildResult, BuildServices, PipelineError, PipelineEvent};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

type FailureFactory = Box<dyn Fn(&BundleRequest) -> PipelineError + Send + Sync>;

/// Bundler that writes a small file and reports a configurable size
pub struct MockBundler {
    bundle_size: u64,
    delay: Option<Duration>,
    failures: HashMap<(String, String), FailureFactory>,
    /// Fail this many calls with a network error before succeeding
    transient_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockBundler {
    pub fn new() -> Self {
        Self {
            bundle_size: 1_000_000,
            delay: None,
            failures: HashMap::new(),
            transient_failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_bundle_size(mut self, size: u64) -> Self {
        self.bundle_size = size;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Always fail `platform`/`environment` with the error `factory` builds
    pub fn failing<F>(mut self, platform: &str, environment: &str, factory: F) -> Self
    where
        F: Fn(&BundleRequest) -> PipelineError + Send + Sync + 'static,
    {
        self.failures.insert(
            (platform.to_string(), environment.to_string()),
            Box::new(factory),
        );
        self
    }

    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bundler for MockBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let key = (request.platform.clone(), request.environment.clone());
        if let Some(factory) = self.failures.get(&key) {
            return Err(factory(request));
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .transient_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(PipelineError::network("registry.example.com", "connection reset"));
        }

        let parent = request.output_path.parent().unwrap();
        tokio::fs::create_dir_all(parent).await.unwrap();
        tokio::fs::write(&request.output_path, b"// bundle").await.unwrap();

        Ok(BundleOutput {
            stdout: "info: bundling\nwarning: large asset images/splash.png\n".to_string(),
            exit_code: 0,
            bundle_path: request.output_path.clone(),
            bundle_size: self.bundle_size,
            peak_memory_bytes: None,
        })
    }
}

pub struct MockCache;

#[async_trait]
impl CacheService for MockCache {
    async fn warm_cache(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: 12,
            size: 4096,
            hit_rate: 0.5,
        }
    }
}

/// Telemetry that records which builds were monitored
#[derive(Default)]
pub struct RecordingTelemetry {
    pub started: Mutex<Vec<String>>,
    pub ended: Mutex<Vec<(String, u64)>>,
}

impl TelemetrySink for RecordingTelemetry {
    fn start_build_monitoring(&self, build_id: &str, _platform: &str, _environment: &str) {
        self.started.lock().unwrap().push(build_id.to_string());
    }

    fn end_build_monitoring(&self, build_id: &str, bundle_size: u64) {
        self.ended
            .lock()
            .unwrap()
            .push((build_id.to_string(), bundle_size));
    }
}

/// Configuration writing everything into `dir`, with fast retries
pub fn test_config(dir: &TempDir) -> BuildPipelineConfig {
    let mut config = BuildPipelineConfig::default();
    config.artifacts.reports_dir = dir.path().join("reports");
    config.artifacts.history_path = dir.path().join("history.json");
    config.error_handling.reports_dir = dir.path().join("reports");
    config.error_handling.fallback_dir = dir.path().join("fallback");
    config.error_handling.global_retry_delay_multiplier = 0.001;
    config.benchmarking.iterations = 2;
    config
}

pub struct TestPipeline {
    pub pipeline: BuildPipeline,
    pub bundler: Arc<MockBundler>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub events: Arc<Mutex<Vec<PipelineEvent>>>,
    pub dir: TempDir,
}

impl TestPipeline {
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }
}

pub fn pipeline_with(bundler: MockBundler, store: Arc<dyn HistoryStore>) -> TestPipeline {
    let dir = tempfile::tempdir().unwrap();
    let bundler = Arc::new(bundler);
    let telemetry = Arc::new(RecordingTelemetry::default());
    let services = BuildServices::new(bundler.clone(), Arc::new(MockCache), telemetry.clone());
    let pipeline = BuildPipeline::new(test_config(&dir), services, store);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    pipeline.subscribe(move |event| sink.lock().unwrap().push(event));

    TestPipeline {
        pipeline,
        bundler,
        telemetry,
        events,
        dir,
    }
}

pub fn pipeline(bundler: MockBundler) -> TestPipeline {
    pipeline_with(bundler, Arc::new(InMemoryHistoryStore::new()))
}

/// A successful historical build
pub fn historical_build(platform: &str, environment: &str, bundle_size: u64) -> BuildResult {
    let mut result = BuildResult::synthetic_failure(
        "build-history",
        platform,
        environment,
        &GitInfo::default(),
        Utc::now(),
        String::new(),
        false,
    );
    result.success = true;
    result.errors.clear();
    result.bundle_size = bundle_size;
    result.duration_ms = 60_000;
    result
}
