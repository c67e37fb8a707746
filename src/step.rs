//! Step trait and error types.

use async_trait::async_trait;
use thiserror::Error;

use crate::remote::FetchError;
use crate::task::{RunId, TaskId};

/// Error returned by a step execution.
#[derive(Error, Debug)]
pub enum StepError {
    /// Worth retrying, in this slice or a later one.
    #[error("transient: {0}")]
    Transient(#[source] anyhow::Error),

    /// Will not succeed on retry; the run fails.
    #[error("{0}")]
    Fatal(#[source] anyhow::Error),
}

impl StepError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(err.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<FetchError> for StepError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Transient(_) => Self::Transient(err.into()),
            FetchError::Fatal(_) => Self::Fatal(err.into()),
        }
    }
}

/// Outcome of one unit of step work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepProgress {
    /// More work remains, starting at this cursor.
    More(String),
    /// The step has nothing left to do.
    Complete,
}

/// What a step knows about the run it is part of.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub task_id: TaskId,
    /// Import id every write of this run is tagged with.
    pub import_id: RunId,
    pub step_index: usize,
}

/// One resumable stage of an import.
///
/// `execute` does a bounded amount of work (one page) starting at `cursor`
/// (`None` when the step starts) and reports where to pick up. Steps must
/// tolerate being replayed from a cursor they already processed.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        ctx: &StepContext,
        cursor: Option<&str>,
    ) -> Result<StepProgress, StepError>;
}
