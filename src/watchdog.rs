//! Reclaims tasks and locks abandoned by crashed or cut-off invocations.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::advisory::{AdvisoryKind, AdvisoryStore};
use crate::clock::{elapsed, Clock};
use crate::context::SyncContext;
use crate::lock::LockManager;
use crate::store::{StoreError, TaskStore};
use crate::task::{TaskFilter, TaskId, TaskStatus};

/// Message written to a task the watchdog stops.
pub const STALE_MESSAGE: &str = "did not respond within threshold";

pub struct Watchdog {
    tasks: Arc<dyn TaskStore>,
    locks: Arc<dyn LockManager>,
    advisories: Arc<dyn AdvisoryStore>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    lock_names: Vec<String>,
}

impl Watchdog {
    pub fn new(ctx: &SyncContext, stale_after: Duration) -> Self {
        Self {
            tasks: ctx.tasks.clone(),
            locks: ctx.locks.clone(),
            advisories: ctx.advisories.clone(),
            clock: ctx.clock.clone(),
            stale_after,
            lock_names: Vec::new(),
        }
    }

    /// Lock names checked for orphans on every sweep.
    pub fn manage<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Stop every `Running`/`Paused` task idle for longer than the threshold,
    /// then release locks whose holder no longer owns the slot.
    ///
    /// Returns the ids of the stopped tasks.
    pub async fn sweep(&self) -> Result<Vec<TaskId>, StoreError> {
        let now = self.clock.now();
        let active = self
            .tasks
            .list(&TaskFilter::new().statuses(&TaskStatus::ACTIVE))
            .await?;

        let mut reclaimed = Vec::new();
        for task in active {
            let idle = elapsed(task.modified_at, now);
            if idle <= self.stale_after {
                continue;
            }

            // CAS from the observed status: a task claimed or finished since
            // the listing is left alone.
            let stopped = self
                .tasks
                .transition(task.id, task.status, TaskStatus::Stopped, Some(STALE_MESSAGE), now)
                .await?;
            if !stopped {
                debug!(task_id = %task.id, "Stale candidate changed state, skipping");
                continue;
            }
            self.locks
                .release_owned(&task.task_type, &task.lock_holder())
                .await?;

            warn!(
                task_id = %task.id,
                task_type = %task.task_type,
                was = %task.status,
                idle_secs = idle.as_secs(),
                "Reclaimed stale task"
            );
            let message = format!("Task {} {}", task.id, STALE_MESSAGE);
            if let Err(e) = self
                .advisories
                .raise(AdvisoryKind::SyncFailed, &task.task_type, &message, now)
                .await
            {
                warn!(task_type = %task.task_type, error = %e, "Failed to raise advisory");
            }
            reclaimed.push(task.id);
        }

        for name in &self.lock_names {
            self.release_if_orphaned(name).await?;
        }

        Ok(reclaimed)
    }

    async fn release_if_orphaned(&self, name: &str) -> Result<(), StoreError> {
        let Some(holder) = self.locks.holder(name).await? else {
            return Ok(());
        };

        // Read the holder's row after the lock, so a claim in progress
        // (status written before the lock) is never mistaken for an orphan.
        let owner = match TaskId::from_lock_holder(&holder) {
            Some(id) => self.tasks.get(id).await?,
            None => None,
        };
        let owned = owner
            .as_ref()
            .is_some_and(|task| task.task_type == name && !task.status.is_terminal());
        if owned {
            return Ok(());
        }

        if self.locks.release_owned(name, &holder).await? {
            warn!(
                lock = name,
                holder = %holder,
                owner_status = owner.as_ref().map(|t| t.status.as_str()).unwrap_or("missing"),
                "Released orphaned lock"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::task::{NewTask, RunId};
    use chrono::Utc;

    fn context(clock: Arc<ManualClock>) -> SyncContext {
        SyncContext::in_memory().with_clock(clock)
    }

    #[tokio::test]
    async fn fresh_tasks_are_left_alone() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ctx = context(clock.clone());
        let task = ctx
            .tasks
            .create(NewTask::new("import", RunId::new("r1"), clock.now()))
            .await
            .unwrap();
        ctx.tasks
            .transition(task.id, TaskStatus::Queued, TaskStatus::Running, None, clock.now())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(600));
        let watchdog = Watchdog::new(&ctx, Duration::from_secs(600)).manage(["import"]);
        assert!(watchdog.sweep().await.unwrap().is_empty());
        assert_eq!(
            ctx.tasks.get(task.id).await.unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn lock_held_by_unknown_holder_is_released() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ctx = context(clock.clone());
        ctx.locks
            .try_acquire("import", "task:99", clock.now())
            .await
            .unwrap();
        ctx.locks
            .try_acquire("unmanaged", "task:99", clock.now())
            .await
            .unwrap();

        let watchdog = Watchdog::new(&ctx, Duration::from_secs(600)).manage(["import"]);
        watchdog.sweep().await.unwrap();

        assert!(!ctx.locks.is_held("import").await.unwrap());
        assert!(ctx.locks.is_held("unmanaged").await.unwrap());
    }
}
