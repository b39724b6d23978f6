//! Test: one failing combination never blocks the others

use crate::helpers::*;
use build_pipeline::{BuildOptions, PipelineError, PipelineEvent, RunStatus};
use serde_json::json;

#[tokio::test]
async fn test_one_platform_failure_degrades_the_run() {
    let bundler = MockBundler::new().failing("ios", "production", |request| {
        PipelineError::platform_build(&request.platform, "xcodebuild exited with code 65")
    });
    let t = pipeline(bundler);
    t.pipeline.initialize(&json!({})).await.unwrap();

    let run = t
        .pipeline
        .execute_build(
            BuildOptions::new(t.dir.path())
                .platforms(["android", "ios"])
                .environments(["development", "production"]),
        )
        .await
        .expect("a partially failed run must not be an error");

    assert_eq!(run.status, RunStatus::Degraded);
    assert!(run.is_degraded());
    assert_eq!(run.results.len(), 4);
    assert_eq!(run.successful().count(), 3);

    let failed: Vec<_> = run.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].platform, "ios");
    assert_eq!(failed[0].environment, "production");
    assert!(failed[0].degraded);
    assert!(failed[0]
        .warnings
        .iter()
        .any(|w| w.contains("degraded mode")));

    // Results come back in request order
    let order: Vec<_> = run
        .results
        .iter()
        .map(|r| format!("{}-{}", r.platform, r.environment))
        .collect();
    assert_eq!(
        order,
        vec![
            "android-development",
            "android-production",
            "ios-development",
            "ios-production"
        ]
    );

    let events = t.events.lock().unwrap();
    let completed = events
        .iter()
        .find_map(|e| match e {
            PipelineEvent::Completed { degraded, successful, failed, .. } => {
                Some((*degraded, *successful, *failed))
            }
            _ => None,
        })
        .expect("completed event");
    assert_eq!(completed, (true, 3, 1));

    let stats = t.pipeline.error_handler().stats();
    assert_eq!(stats.degraded_operations, 1);
}

#[tokio::test]
async fn test_non_recoverable_failure_still_isolated() {
    let bundler = MockBundler::new().failing("android", "production", |_| {
        PipelineError::configuration("missing signing key")
    });
    let t = pipeline(bundler);
    t.pipeline.initialize(&json!({})).await.unwrap();

    let run = t
        .pipeline
        .execute_build(
            BuildOptions::new(t.dir.path())
                .platforms(["android", "ios"])
                .environments(["production"]),
        )
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Degraded);
    let failed: Vec<_> = run.failed().collect();
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].degraded);
    assert!(failed[0].errors[0].contains("missing signing key"));
    assert_eq!(t.pipeline.error_handler().stats().critical_failures, 1);
}

#[tokio::test]
async fn test_successful_results_carry_artifacts_and_warnings() {
    let t = pipeline(MockBundler::new());
    t.pipeline.initialize(&json!({})).await.unwrap();

    let run = t
        .pipeline
        .execute_build(
            BuildOptions::new(t.dir.path())
                .platforms(["android"])
                .environments(["production"]),
        )
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    let result = &run.results[0];
    assert_eq!(result.bundle_size, 1_000_000);
    assert!(result.artifacts.contains_key("bundle"));
    assert!(result.artifacts.contains_key("analysis"));
    assert_eq!(result.metrics["cache_entries"], 12.0);
    assert_eq!(result.warnings, vec!["large asset images/splash.png"]);
    assert!(run.benchmark.is_some());

    let ended = t.telemetry.ended.lock().unwrap();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].1, 1_000_000);

    let report = std::fs::read_to_string(run.report_path.unwrap()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["summary"]["successful_builds"], 1);
}
