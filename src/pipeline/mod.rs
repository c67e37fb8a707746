//! Resumable, time-budgeted import pipeline.
//!
//! A [`Pipeline`] is an ordered list of named [`Step`]s. Each call to
//! [`Pipeline::run_slice`] resumes from the checkpoint, works until the steps
//! are exhausted or the time budget is spent, and returns the new checkpoint
//! together with a [`PipelineResult`].
//!
//! ```rust,ignore
//! let pipeline = Pipeline::new("import")
//!     .step(FetchEntities::new("venues", client.clone(), storage.clone()))
//!     .step(FetchEntities::new("events", client.clone(), storage.clone()))
//!     .step(ReconcileDeletions::new(["venues", "events"], storage.clone()))
//!     .with_budget(Duration::from_secs(25))
//!     .with_retry(RetryPolicy::exponential(3));
//! ```

mod checkpoint;
mod steps;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use checkpoint::ImportState;
pub use steps::{FetchEntities, ReconcileDeletions};

use crate::clock::{elapsed, Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::job::{Job, PipelineResult, RunContext};
use crate::recorder::{NoopRecorder, Recorder, SliceId, SliceStatus, StepStatus};
use crate::retry::RetryPolicy;
use crate::step::{Step, StepContext, StepError, StepProgress};
use crate::task::{Checkpoint, RunId};

/// Error during pipeline execution.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("checkpoint does not decode: {0}")]
    InvalidCheckpoint(String),

    /// The checkpoint was written by another run.
    #[error("checkpoint belongs to import {found}, not {expected}")]
    ForeignCheckpoint { expected: RunId, found: RunId },

    #[error("checkpoint points at step {step} of a {count}-step pipeline")]
    StepOutOfRange { step: usize, count: usize },

    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("step '{step}' failed transiently in {failures} consecutive slices: {source}")]
    TransientLimit {
        step: String,
        failures: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("recorder error: {0}")]
    RecorderError(#[from] anyhow::Error),
}

/// How a slice ended when no step failed.
enum SliceEnd {
    Done,
    Suspended,
}

pub struct Pipeline {
    name: String,
    steps: Vec<Box<dyn Step>>,
    config: PipelineConfig,
    retry_policy: RetryPolicy,
    recorder: Arc<dyn Recorder>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    /// Pipeline registered under the task type `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            config: PipelineConfig::default(),
            retry_policy: RetryPolicy::default(),
            recorder: Arc::new(NoopRecorder),
            clock: Arc::new(SystemClock),
        }
    }

    /// Append a step.
    pub fn step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Wall-clock budget of one slice.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.config.time_budget = budget;
        self
    }

    pub fn max_transient_failures(mut self, max: u32) -> Self {
        self.config.max_transient_failures = max;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_recorder<R: Recorder + 'static>(mut self, recorder: R) -> Self {
        self.recorder = Arc::new(recorder);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Execute one slice of the run identified by `ctx`.
    ///
    /// Step failures and unusable checkpoints come back as
    /// `PipelineResult::Failed`; only recorder failures are returned as `Err`.
    pub async fn run_slice(
        &self,
        ctx: &RunContext,
        checkpoint: Checkpoint,
    ) -> Result<(Checkpoint, PipelineResult), PipelineError> {
        let started = self.clock.now();
        let mut state = match self.resume(ctx, &checkpoint) {
            Ok(state) => state,
            Err(e) => {
                warn!(pipeline = %self.name, task_id = %ctx.task_id, error = %e, "Refusing checkpoint");
                return Ok((checkpoint, PipelineResult::Failed(e.to_string())));
            }
        };

        let slice_id = self
            .recorder
            .start_slice(&self.name, &ctx.run_id, ctx.task_id)
            .await?;

        let result = match self.drive(ctx, slice_id, &mut state, started).await {
            Ok(SliceEnd::Done) => {
                self.recorder
                    .complete_slice(slice_id, SliceStatus::Completed)
                    .await?;
                PipelineResult::Done
            }
            Ok(SliceEnd::Suspended) => {
                self.recorder
                    .complete_slice(slice_id, SliceStatus::Suspended)
                    .await?;
                PipelineResult::Continue
            }
            Err(PipelineError::RecorderError(e)) => return Err(PipelineError::RecorderError(e)),
            Err(e) => {
                let error = e.to_string();
                self.recorder
                    .complete_slice(slice_id, SliceStatus::Failed { error: error.clone() })
                    .await?;
                PipelineResult::Failed(error)
            }
        };

        debug!(
            pipeline = %self.name,
            task_id = %ctx.task_id,
            step = state.step,
            cursor = state.cursor.as_deref().unwrap_or("-"),
            result = ?result,
            "Slice ended"
        );
        Ok((state.to_checkpoint(), result))
    }

    fn resume(&self, ctx: &RunContext, checkpoint: &Checkpoint) -> Result<ImportState, PipelineError> {
        let Some(state) = ImportState::decode(checkpoint)? else {
            info!(pipeline = %self.name, import_id = %ctx.run_id, "Starting import");
            return Ok(ImportState::fresh(ctx.run_id.clone()));
        };
        if state.import_id != ctx.run_id {
            return Err(PipelineError::ForeignCheckpoint {
                expected: ctx.run_id.clone(),
                found: state.import_id,
            });
        }
        if state.step > self.steps.len() {
            return Err(PipelineError::StepOutOfRange {
                step: state.step,
                count: self.steps.len(),
            });
        }
        Ok(state)
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        slice_id: SliceId,
        state: &mut ImportState,
        started: DateTime<Utc>,
    ) -> Result<SliceEnd, PipelineError> {
        while let Some(step) = self.steps.get(state.step) {
            let step_ctx = StepContext {
                task_id: ctx.task_id,
                import_id: state.import_id.clone(),
                step_index: state.step,
            };
            let step_id = self
                .recorder
                .start_step(slice_id, step.name(), state.step as u32)
                .await?;

            loop {
                match self
                    .execute_with_retry(step.as_ref(), &step_ctx, state.cursor.as_deref(), started)
                    .await
                {
                    Ok(StepProgress::More(next)) => {
                        state.transient_failures = 0;
                        state.cursor = Some(next);
                    }
                    Ok(StepProgress::Complete) => {
                        state.transient_failures = 0;
                        state.advance();
                        self.recorder
                            .complete_step(step_id, StepStatus::Completed)
                            .await?;
                        break;
                    }
                    Err((StepError::Transient(e), attempt)) => {
                        state.transient_failures += 1;
                        self.recorder
                            .complete_step(
                                step_id,
                                StepStatus::Failed {
                                    error: e.to_string(),
                                    attempt,
                                },
                            )
                            .await?;
                        if state.transient_failures >= self.config.max_transient_failures {
                            return Err(PipelineError::TransientLimit {
                                step: step.name().to_string(),
                                failures: state.transient_failures,
                                source: e,
                            });
                        }
                        warn!(
                            pipeline = %self.name,
                            step = step.name(),
                            failures = state.transient_failures,
                            error = %e,
                            "Transient step failure, continuing next slice"
                        );
                        return Ok(SliceEnd::Suspended);
                    }
                    Err((StepError::Fatal(e), attempt)) => {
                        self.recorder
                            .complete_step(
                                step_id,
                                StepStatus::Failed {
                                    error: e.to_string(),
                                    attempt,
                                },
                            )
                            .await?;
                        return Err(PipelineError::StepFailed {
                            step: step.name().to_string(),
                            source: e,
                        });
                    }
                }

                if self.budget_spent(started) {
                    self.recorder
                        .complete_step(
                            step_id,
                            StepStatus::Suspended {
                                cursor: state.cursor.clone(),
                            },
                        )
                        .await?;
                    return Ok(SliceEnd::Suspended);
                }
            }

            if state.step < self.steps.len() && self.budget_spent(started) {
                return Ok(SliceEnd::Suspended);
            }
        }

        info!(pipeline = %self.name, import_id = %state.import_id, "Import complete");
        Ok(SliceEnd::Done)
    }

    async fn execute_with_retry(
        &self,
        step: &dyn Step,
        ctx: &StepContext,
        cursor: Option<&str>,
        started: DateTime<Utc>,
    ) -> Result<StepProgress, (StepError, u32)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match step.execute(ctx, cursor).await {
                Ok(progress) => return Ok(progress),
                Err(StepError::Transient(e)) => {
                    match self.retry_policy.delay_within(attempt, self.remaining(started)) {
                        Some(delay) => {
                            debug!(
                                step = step.name(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Retrying step"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err((StepError::Transient(e), attempt)),
                    }
                }
                Err(fatal) => return Err((fatal, attempt)),
            }
        }
    }

    fn remaining(&self, started: DateTime<Utc>) -> Duration {
        self.config
            .time_budget
            .saturating_sub(elapsed(started, self.clock.now()))
    }

    fn budget_spent(&self, started: DateTime<Utc>) -> bool {
        elapsed(started, self.clock.now()) >= self.config.time_budget
    }
}

#[async_trait]
impl Job for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        ctx: &RunContext,
        checkpoint: Checkpoint,
    ) -> anyhow::Result<(Checkpoint, PipelineResult)> {
        Ok(self.run_slice(ctx, checkpoint).await?)
    }

    fn progress(&self, checkpoint: &Checkpoint) -> Option<String> {
        let state = ImportState::decode(checkpoint).ok().flatten()?;
        let step = self.steps.get(state.step)?;
        Some(format!(
            "step {}/{}: {}",
            state.step + 1,
            self.steps.len(),
            step.name()
        ))
    }
}
