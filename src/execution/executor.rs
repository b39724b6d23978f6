//! Step executor - runs the steps of one combination through the error handler

use crate::core::{BuildContext, BuildStep, StepResult};
use crate::error::{Degradation, ErrorHandler, ErrorScope, Handled, PipelineError};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// What running a combination's steps produced
#[derive(Debug, Default)]
pub struct CombinationOutcome {
    pub step_results: Vec<StepResult>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub degradations: Vec<Degradation>,
    /// Set when a step stopped the combination
    pub failed: bool,
    /// The error that stopped the combination, if it was not degraded
    pub fatal: Option<PipelineError>,
}

impl CombinationOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Executes steps with timeout, retry, recovery and degradation
pub struct StepExecutor {
    handler: Arc<ErrorHandler>,
}

impl StepExecutor {
    pub fn new(handler: Arc<ErrorHandler>) -> Self {
        Self { handler }
    }

    /// Execute one step under its own timeout, wrapped by the error handler
    pub async fn execute(
        &self,
        step: &dyn BuildStep,
        context: &BuildContext,
        scope: &ErrorScope,
    ) -> Result<Handled<StepResult>, PipelineError> {
        let scope = scope.for_operation(step.name());
        let limit = step.timeout();

        self.handler
            .execute(&scope, Some(step.retries()), || async move {
                match timeout(limit, step.execute(context)).await {
                    Ok(result) => result,
                    Err(_) => {
                        error!("Timeout for step {} after {:?}", step.name(), limit);
                        Err(PipelineError::timeout(step.name(), limit).into())
                    }
                }
            })
            .await
    }

    /// Run `steps` in order against one combination's context.
    ///
    /// Successful results are merged into `context` before the next step
    /// runs. A failing step with `continue_on_failure` only adds a warning;
    /// otherwise the remaining steps are skipped and the outcome is failed.
    pub async fn run_steps(
        &self,
        steps: &[Box<dyn BuildStep>],
        context: &mut BuildContext,
        scope: &ErrorScope,
    ) -> CombinationOutcome {
        let mut outcome = CombinationOutcome::default();

        for step in steps {
            if !step.enabled() {
                debug!("Skipping disabled step {}", step.name());
                continue;
            }

            info!("Executing step: {} ({})", step.name(), step.description());
            let started = Instant::now();

            match self.execute(step.as_ref(), context, scope).await {
                Ok(Handled::Success(result)) | Ok(Handled::Recovered(result)) => {
                    context.merge(&result.artifacts, &result.metrics);
                    outcome.warnings.extend(result.warnings.iter().cloned());
                    info!("Step {} completed in {}ms", step.name(), result.duration_ms);
                    outcome.step_results.push(result);
                }
                Ok(Handled::Degraded(degradation)) => {
                    let description = degradation.describe();
                    outcome
                        .warnings
                        .push(format!("{}: {}", step.name(), description));
                    outcome.step_results.push(StepResult::failure(
                        step.name(),
                        description,
                        started.elapsed(),
                    ));

                    // A degraded step produced nothing for later steps to use
                    let stop = degradation.skips_platform() || !step.continue_on_failure();
                    if stop {
                        outcome.errors.push(degradation.error.to_string());
                    }
                    outcome.degradations.push(degradation);
                    if stop {
                        warn!("Step {} degraded, stopping combination", step.name());
                        outcome.failed = true;
                        break;
                    }
                }
                Err(e) => {
                    outcome.step_results.push(StepResult::failure(
                        step.name(),
                        e.to_string(),
                        started.elapsed(),
                    ));
                    if step.continue_on_failure() {
                        warn!("Step {} failed, continuing: {}", step.name(), e);
                        outcome
                            .warnings
                            .push(format!("{} failed: {}", step.name(), e));
                    } else {
                        error!("Step {} failed, stopping combination: {}", step.name(), e);
                        outcome.errors.push(e.to_string());
                        outcome.failed = true;
                        outcome.fatal = Some(e);
                        break;
                    }
                }
            }
        }

        outcome
    }
}
