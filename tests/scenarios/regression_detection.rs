//! Test: regression detection over build history

use crate::helpers::*;
use build_pipeline::persistence::InMemoryHistoryStore;
use build_pipeline::{BuildOptions, PipelineEvent, RegressionMetric, RegressionSeverity};
use serde_json::json;
use std::sync::Arc;

fn stable_history() -> Vec<build_pipeline::BuildResult> {
    (0..5)
        .map(|_| historical_build("android", "production", 1_000_000))
        .collect()
}

#[tokio::test]
async fn test_twenty_percent_growth_is_one_regression() {
    let mut history = stable_history();
    history.push(historical_build("android", "production", 1_200_000));
    let t = pipeline_with(
        MockBundler::new(),
        Arc::new(InMemoryHistoryStore::with_history(history)),
    );
    t.pipeline
        .initialize(&json!({ "regression": { "threshold_bundle_size": 10.0 } }))
        .await
        .unwrap();

    let regressions = t.pipeline.analyze_regressions(6).await;

    assert_eq!(regressions.len(), 1);
    let regression = &regressions[0];
    assert_eq!(regression.metric, RegressionMetric::BundleSize);
    assert!((regression.regression - 20.0).abs() < 0.01);
    assert_eq!(regression.severity, RegressionSeverity::Minor);
    assert_eq!(t.pipeline.regressions().len(), 1);
}

#[tokio::test]
async fn test_major_severity_follows_configured_cutoff() {
    let mut history = stable_history();
    history.push(historical_build("android", "production", 1_200_000));
    let t = pipeline_with(
        MockBundler::new(),
        Arc::new(InMemoryHistoryStore::with_history(history)),
    );
    t.pipeline
        .initialize(&json!({ "regression": { "bundle_size_cutoffs": { "major": 1.5 } } }))
        .await
        .unwrap();

    let regressions = t.pipeline.analyze_regressions(10).await;
    assert_eq!(regressions[0].severity, RegressionSeverity::Major);
}

#[tokio::test]
async fn test_build_run_raises_regression_event() {
    let t = pipeline_with(
        MockBundler::new().with_bundle_size(1_200_000),
        Arc::new(InMemoryHistoryStore::with_history(stable_history())),
    );
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

    assert_eq!(run.regressions.len(), 1);
    assert_eq!(run.regressions[0].metric, RegressionMetric::BundleSize);
    assert_eq!(run.regressions[0].build_id, run.build_id);

    let events = t.events.lock().unwrap();
    let detected = events
        .iter()
        .find_map(|e| match e {
            PipelineEvent::RegressionDetected { build_id, regressions } => {
                Some((build_id.clone(), regressions.len()))
            }
            _ => None,
        })
        .expect("regression event");
    assert_eq!(detected, (run.build_id.clone(), 1));
}

#[tokio::test]
async fn test_alerts_can_be_disabled() {
    let t = pipeline_with(
        MockBundler::new().with_bundle_size(1_200_000),
        Arc::new(InMemoryHistoryStore::with_history(stable_history())),
    );
    t.pipeline
        .initialize(&json!({ "regression": { "alert_on_regression": false } }))
        .await
        .unwrap();

    let run = t
        .pipeline
        .execute_build(
            BuildOptions::new(t.dir.path())
                .platforms(["android"])
                .environments(["production"]),
        )
        .await
        .unwrap();

    assert_eq!(run.regressions.len(), 1);
    assert!(!t.event_names().contains(&"pipeline-regression-detected"));
}
