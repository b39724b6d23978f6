//! build-pipeline - multi-platform build orchestration with error recovery
//! and performance regression tracking

pub mod analysis;
pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod services;

// Re-export commonly used types
pub use analysis::{PerformanceRegression, RegressionAnalyzer, RegressionMetric, RegressionSeverity};
pub use core::{BuildContext, BuildPipelineConfig, BuildResult, BuildStep, PipelineRun, RunStatus, StepResult};
pub use error::{ErrorHandler, ErrorHandlingStats, ErrorKind, PipelineError, Severity};
pub use execution::{BuildError, BuildOptions, BuildPipeline, PipelineEvent, StepExecutor};
pub use persistence::{HistoryStore, InMemoryHistoryStore, JsonHistoryStore};
pub use services::{BuildServices, Bundler, CacheService, TelemetrySink};
