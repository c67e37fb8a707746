//! Recording interface for import history.
//!
//! A slice is one `Pipeline::run` call, i.e. the part of a run executed by a
//! single tick. Each step worked on during a slice gets its own record.

use async_trait::async_trait;

use crate::task::{RunId, TaskId};

/// Unique identifier for a recorded slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SliceId(pub i64);

/// Unique identifier for a recorded step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(pub i64);

/// How a slice ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceStatus {
    /// The run is done.
    Completed,
    /// Budget spent or transient error; the run continues on a later tick.
    Suspended,
    Failed { error: String },
}

/// How a step execution ended within a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    /// Interrupted with work left at `cursor`.
    Suspended { cursor: Option<String> },
    Failed { error: String, attempt: u32 },
}

/// Records pipeline execution for observability.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn start_slice(
        &self,
        pipeline_name: &str,
        run_id: &RunId,
        task_id: TaskId,
    ) -> anyhow::Result<SliceId>;

    async fn start_step(
        &self,
        slice_id: SliceId,
        step_name: &str,
        step_index: u32,
    ) -> anyhow::Result<StepId>;

    async fn complete_step(&self, step_id: StepId, status: StepStatus) -> anyhow::Result<()>;

    async fn complete_slice(&self, slice_id: SliceId, status: SliceStatus) -> anyhow::Result<()>;
}

/// A recorder that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopRecorder;

impl NoopRecorder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Recorder for NoopRecorder {
    async fn start_slice(
        &self,
        _pipeline_name: &str,
        _run_id: &RunId,
        _task_id: TaskId,
    ) -> anyhow::Result<SliceId> {
        Ok(SliceId(0))
    }

    async fn start_step(
        &self,
        _slice_id: SliceId,
        _step_name: &str,
        _step_index: u32,
    ) -> anyhow::Result<StepId> {
        Ok(StepId(0))
    }

    async fn complete_step(&self, _step_id: StepId, _status: StepStatus) -> anyhow::Result<()> {
        Ok(())
    }

    async fn complete_slice(
        &self,
        _slice_id: SliceId,
        _status: SliceStatus,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
