//! Test: retry budget, backoff and error statistics

use crate::helpers::*;
use build_pipeline::core::config::ErrorHandlingConfig;
use build_pipeline::error::{ErrorScope, Handled};
use build_pipeline::{BuildOptions, ErrorHandler, ErrorKind, HistoryStore, PipelineError, RunStatus};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn quiet_handler() -> ErrorHandler {
    ErrorHandler::new(ErrorHandlingConfig {
        enable_auto_recovery: false,
        enable_graceful_degradation: false,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_always_failing_operation_runs_max_retries_plus_one() {
    let handler = quiet_handler();
    let attempts = AtomicUsize::new(0);
    let counter = &attempts;

    let result: Result<Handled<()>, PipelineError> = handler
        .execute(&ErrorScope::new("compile"), None, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), anyhow::Error>(
                PipelineError::build_step("compile", "syntax error")
                    .with_retry_policy(true, 3, 1)
                    .into(),
            )
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BuildStep);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    let stats = handler.stats();
    assert_eq!(stats.retried_operations, 3);
    assert_eq!(stats.total_errors, 1);
}

#[test]
fn test_backoff_doubles_per_attempt() {
    let handler = quiet_handler();
    let error = PipelineError::network("registry.example.com", "timeout");

    let delays: Vec<Duration> = (0..4).map(|a| handler.backoff_delay(&error, a)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(2000),
            Duration::from_millis(4000),
            Duration::from_millis(8000),
            Duration::from_millis(16000),
        ]
    );
}

#[tokio::test]
async fn test_stats_count_and_reset() {
    let handler = quiet_handler();
    for _ in 0..5 {
        let _ = handler
            .handle_error(PipelineError::ci("github", "bad trigger"), &ErrorScope::new("ci"))
            .await;
    }

    let stats = handler.stats();
    assert_eq!(stats.total_errors, 5);
    assert_eq!(stats.count_for(ErrorKind::Ci), 5);

    handler.reset();
    assert_eq!(handler.stats(), Default::default());
    assert!(handler.errors().is_empty());
}

#[tokio::test]
async fn test_transient_bundler_failure_is_retried() {
    let t = pipeline(MockBundler::new().with_transient_failures(2));
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
    assert_eq!(t.bundler.calls(), 3);

    let stats = t.pipeline.error_handler().stats();
    assert_eq!(stats.total_errors, 0);
    assert_eq!(stats.retried_operations, 2);
    assert_eq!(stats.degraded_operations, 0);
}

#[tokio::test]
async fn test_history_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");

    let first = pipeline_with(
        MockBundler::new(),
        std::sync::Arc::new(build_pipeline::JsonHistoryStore::new(&path)),
    );
    first.pipeline.initialize(&json!({})).await.unwrap();
    first
        .pipeline
        .execute_build(BuildOptions::new(first.dir.path()).platforms(["android"]))
        .await
        .unwrap();

    let second = pipeline_with(
        MockBundler::new(),
        std::sync::Arc::new(build_pipeline::JsonHistoryStore::new(&path)),
    );
    second.pipeline.initialize(&json!({})).await.unwrap();
    assert_eq!(second.pipeline.history().await.len(), 2);
}

#[tokio::test]
async fn test_unwritable_history_is_redirected_to_fallback_dir() {
    let outside = tempfile::tempdir().unwrap();
    let blocker = outside.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let t = pipeline_with(
        MockBundler::new(),
        std::sync::Arc::new(build_pipeline::JsonHistoryStore::new(blocker.join("history.json"))),
    );
    t.pipeline.initialize(&json!({})).await.unwrap();

    let run = t
        .pipeline
        .execute_build(BuildOptions::new(t.dir.path()).platforms(["android"]))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let stats = t.pipeline.error_handler().stats();
    assert_eq!(stats.count_for(ErrorKind::FileSystem), 1);
    assert_eq!(stats.degraded_operations, 1);

    let fallback = t
        .dir
        .path()
        .join("fallback")
        .join(build_pipeline::execution::FALLBACK_HISTORY_FILE);
    let saved = build_pipeline::JsonHistoryStore::new(&fallback).load().await.unwrap();
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|r| r.success));
}
