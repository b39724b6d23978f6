//! Pipeline execution: the step executor and the build orchestrator

pub mod engine;
pub mod executor;

pub use engine::{
    detect_ci_provider, BuildError, BuildOptions, BuildPipeline, EventHandler, PipelineEvent,
    FALLBACK_HISTORY_FILE,
};
pub use executor::{CombinationOutcome, StepExecutor};
