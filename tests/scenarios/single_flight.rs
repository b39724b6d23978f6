//! Test: a second build is rejected while one is running

use crate::helpers::*;
use build_pipeline::{BuildError, BuildOptions, RunStatus};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_build_is_rejected() {
    let t = pipeline(MockBundler::new().with_delay(Duration::from_millis(200)));
    t.pipeline.initialize(&json!({})).await.unwrap();
    let options = BuildOptions::new(t.dir.path());

    let (first, second) = tokio::join!(t.pipeline.execute_build(options.clone()), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(t.pipeline.is_running());
        t.pipeline.execute_build(options.clone()).await
    });

    assert!(matches!(second, Err(BuildError::AlreadyRunning)));

    // The first run is unaffected by the rejected one
    let first = first.unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(first.results.len(), 4);
    assert_eq!(t.bundler.calls(), 4);
    assert_eq!(t.pipeline.history().await.len(), 4);
}

#[tokio::test]
async fn test_guard_is_cleared_after_each_run() {
    let bundler = MockBundler::new().failing("android", "production", |request| {
        build_pipeline::PipelineError::platform_build(&request.platform, "exit 1")
    });
    let t = pipeline(bundler);
    t.pipeline.initialize(&json!({})).await.unwrap();

    // A failed run releases the guard too
    let failed = t
        .pipeline
        .execute_build(
            BuildOptions::new(t.dir.path())
                .platforms(["android"])
                .environments(["production"]),
        )
        .await;
    assert!(matches!(failed, Err(BuildError::Pipeline(_))));
    assert!(!t.pipeline.is_running());

    let run = t
        .pipeline
        .execute_build(
            BuildOptions::new(t.dir.path())
                .platforms(["ios"])
                .environments(["production"]),
        )
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        t.event_names(),
        vec!["pipeline-initialized", "pipeline-failed", "pipeline-completed"]
    );
}
