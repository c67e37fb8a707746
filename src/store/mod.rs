//! Task storage trait and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::task::{Checkpoint, NewTask, Task, TaskFilter, TaskId, TaskStatus};

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryTaskStore;
#[cfg(feature = "sqlite")]
pub(crate) use sqlite::{db_err, format_ts, parse_ts};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTaskStore;

/// Error type for task and lock storage.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable table of task records.
///
/// Every method is atomic with respect to a single task row. Timestamps are
/// supplied by the caller's clock; stores never let `modified_at` move backwards.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new `Queued` task.
    async fn create(&self, task: NewTask) -> Result<Task, StoreError>;

    /// Insert a new task unless one of the same type is already queued, running
    /// or paused. Returns the task and whether it was created.
    async fn create_unless_pending(&self, task: NewTask) -> Result<(Task, bool), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// List matching tasks, oldest first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Most recently created task of a type in the given status.
    async fn latest(&self, task_type: &str, status: TaskStatus) -> Result<Option<Task>, StoreError> {
        let tasks = self
            .list(&TaskFilter::new().task_type(task_type).status(status))
            .await?;
        Ok(tasks.into_iter().last())
    }

    /// Set the status (and message, when given) of a task.
    ///
    /// Fails with [`StoreError::InvalidTransition`] if the lifecycle forbids the move.
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Move a task from `from` to `to` only if it is currently in `from`.
    /// Returns false if the task was in any other state.
    async fn transition(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Upgrade a `Queued` task to [`Priority::Immediate`]. Returns false if the
    /// task is no longer queued or already immediate.
    ///
    /// [`Priority::Immediate`]: crate::task::Priority::Immediate
    async fn raise_priority(&self, id: TaskId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Replace the checkpoint of a task.
    async fn update_checkpoint(
        &self,
        id: TaskId,
        checkpoint: &Checkpoint,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Delete every task in `status`. Returns the number of rows removed.
    async fn delete_by_status(&self, status: TaskStatus) -> Result<u64, StoreError>;
}
