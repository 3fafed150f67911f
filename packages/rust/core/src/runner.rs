//! Runs one stage with bounded retry on transient failures.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{instrument, warn};

use redline_shared::{EventKind, RedlineError, Result};

use crate::context::PipelineContext;
use crate::pipeline::ProgressReporter;
use crate::stage::{
    RetryDecision, RetryPolicy, StageExecutor, StageInput, StageSpec, classify, decide,
};

/// Result status that flags a stage output for human review.
const NEEDS_CORRECTION: &str = "needs_correction";

/// Successful stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// Attempts made, including the successful one.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Drives a [`StageSpec`] through an executor against the shared context.
#[derive(Debug, Clone)]
pub struct StageRunner {
    policy: RetryPolicy,
}

impl StageRunner {
    /// `policy` applies to stages that carry no override of their own.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute `stage` at most `max_attempts` times.
    ///
    /// Every attempt is bracketed in the log. Transient failures sleep for the
    /// fixed backoff and retry; anything else fails immediately. On success the
    /// result is stored under the stage name and no further attempts are made.
    #[instrument(skip_all, fields(stage = %stage.name))]
    pub async fn run(
        &self,
        stage: &StageSpec,
        ctx: &mut PipelineContext,
        executor: &mut dyn StageExecutor,
        progress: &dyn ProgressReporter,
    ) -> Result<StageOutcome> {
        let policy = stage.retry.as_ref().unwrap_or(&self.policy);
        let name = stage.name.as_str();
        let start = Instant::now();

        let missing = stage.missing_requirements(ctx);
        if !missing.is_empty() {
            let message = format!("missing prerequisite results: {}", missing.join(", "));
            ctx.record(name, EventKind::AttemptFailed, &message);
            return Err(RedlineError::validation(format!("stage {name}: {message}")));
        }

        // Prior results cannot change between attempts.
        let input = StageInput::from_context(ctx);
        let max_attempts = policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            ctx.record(
                name,
                EventKind::AttemptStart,
                format!("attempt {attempt}/{max_attempts}"),
            );
            progress.stage_attempt(name, attempt, max_attempts);

            let attempt_start = Instant::now();
            match executor.execute(stage, &input) {
                Ok(value) => {
                    ctx.record(
                        name,
                        EventKind::AttemptSucceeded,
                        format!("completed in {} ms", attempt_start.elapsed().as_millis()),
                    );
                    let flagged = needs_correction(&value);
                    ctx.store_result(name, value);
                    if flagged {
                        ctx.record(name, EventKind::Alert, "analysis needs correction");
                    }
                    return Ok(StageOutcome {
                        attempts: attempt,
                        elapsed: start.elapsed(),
                    });
                }
                Err(err) => {
                    ctx.record(name, EventKind::AttemptFailed, &err.message);
                    match decide(classify(&err.message, policy), attempt, policy) {
                        RetryDecision::Retry(delay) => {
                            warn!(attempt, error = %err, "transient failure, retrying");
                            ctx.record(
                                name,
                                EventKind::RetryScheduled,
                                format!("retrying in {} ms", delay.as_millis()),
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::Exhausted => break,
                        RetryDecision::Abort => {
                            return Err(RedlineError::stage(name, err.message));
                        }
                    }
                }
            }
        }

        ctx.record(
            name,
            EventKind::StageExhausted,
            format!("gave up after {max_attempts} attempts"),
        );
        Err(RedlineError::StageExhausted {
            stage: name.to_string(),
            attempts: max_attempts,
        })
    }
}

fn needs_correction(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some(NEEDS_CORRECTION)
}
