//! The unit of work the scheduler drives.

use async_trait::async_trait;

use crate::task::{Checkpoint, RunId, TaskId};

/// Identity of the task a slice runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub task_id: TaskId,
    pub run_id: RunId,
}

/// What a slice reports back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    /// Progress was checkpointed; schedule another slice.
    Continue,
    Done,
    Failed(String),
}

/// A resumable job registered under a task type.
///
/// The scheduler never looks inside the checkpoint: whatever `run` returns
/// is stored and handed back unchanged to the next slice of the same task.
#[async_trait]
pub trait Job: Send + Sync {
    /// Task type this job runs for. Also the name of the lock guarding it.
    fn name(&self) -> &str;

    async fn run(
        &self,
        ctx: &RunContext,
        checkpoint: Checkpoint,
    ) -> anyhow::Result<(Checkpoint, PipelineResult)>;

    /// Human-readable progress for the task message while the run is paused.
    fn progress(&self, _checkpoint: &Checkpoint) -> Option<String> {
        None
    }
}
