use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{StoreError, TaskStore};
use crate::task::{Checkpoint, NewTask, Priority, Task, TaskFilter, TaskId, TaskStatus};

#[derive(Default)]
struct Inner {
    next_id: i64,
    tasks: BTreeMap<TaskId, Task>,
}

/// In-process task store.
///
/// State lives only as long as the value; useful for tests and for hosts
/// running the scheduler inside one long-lived process.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("task store mutex poisoned".into()))
    }
}

impl Inner {
    fn insert(&mut self, new: NewTask) -> Task {
        self.next_id += 1;
        let task = new.into_task(TaskId(self.next_id));
        self.tasks.insert(task.id, task.clone());
        task
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, StoreError> {
        self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

fn touch(task: &mut Task, at: DateTime<Utc>) {
    task.modified_at = task.modified_at.max(at);
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
        Ok(self.lock()?.insert(task))
    }

    async fn create_unless_pending(&self, task: NewTask) -> Result<(Task, bool), StoreError> {
        let mut inner = self.lock()?;
        let existing = inner
            .tasks
            .values()
            .find(|t| t.task_type == task.task_type && TaskStatus::PENDING.contains(&t.status))
            .cloned();
        match existing {
            Some(existing) => Ok((existing, false)),
            None => Ok((inner.insert(task), true)),
        }
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.lock()?.tasks.get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .lock()?
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let task = inner.task_mut(id)?;
        if !task.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        if let Some(message) = message {
            task.message = Some(message.to_string());
        }
        touch(task, at);
        Ok(())
    }

    async fn transition(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from, to });
        }
        let mut inner = self.lock()?;
        let task = inner.task_mut(id)?;
        if task.status != from {
            return Ok(false);
        }
        task.status = to;
        if let Some(message) = message {
            task.message = Some(message.to_string());
        }
        touch(task, at);
        Ok(true)
    }

    async fn raise_priority(&self, id: TaskId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let task = inner.task_mut(id)?;
        if task.status != TaskStatus::Queued || task.priority == Priority::Immediate {
            return Ok(false);
        }
        task.priority = Priority::Immediate;
        touch(task, at);
        Ok(true)
    }

    async fn update_checkpoint(
        &self,
        id: TaskId,
        checkpoint: &Checkpoint,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let task = inner.task_mut(id)?;
        task.checkpoint = checkpoint.clone();
        touch(task, at);
        Ok(())
    }

    async fn delete_by_status(&self, status: TaskStatus) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.tasks.len();
        inner.tasks.retain(|_, t| t.status != status);
        Ok((before - inner.tasks.len()) as u64)
    }
}
