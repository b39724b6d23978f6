//! Scenario-based tests for the build pipeline

mod helpers;

mod partial_failure;
mod regression_detection;
mod retry_and_stats;
mod single_flight;
