//! Tick-driven scheduler for resumable jobs.
//!
//! Every [`Scheduler::tick`] is a short, self-contained pass: reclaim stale
//! work, then claim at most one task and run one slice of its job. Any
//! number of ticks may run concurrently; exclusion comes only from the task
//! status compare-and-set and the per-type lock.

mod builder;
mod driver;
mod follow_up;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use builder::SchedulerBuilder;
pub use driver::TickLoop;
pub use follow_up::{FollowUp, NoFollowUp, NotifyFollowUp};

use crate::advisory::{Advisory, AdvisoryKind};
use crate::clock::elapsed;
use crate::config::SchedulerConfig;
use crate::context::SyncContext;
use crate::job::{Job, PipelineResult, RunContext};
use crate::store::StoreError;
use crate::task::{NewTask, Priority, Task, TaskFilter, TaskId, TaskStatus};
use crate::watchdog::Watchdog;

/// Message of a task stopped through [`Scheduler::terminate`].
pub const TERMINATED_MESSAGE: &str = "terminated by user";
/// Message of a task whose job completed.
pub const FINISHED_MESSAGE: &str = "Import finished";
/// Message of a paused task whose job reports no progress of its own.
pub const IN_PROGRESS_MESSAGE: &str = "Import in progress";

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("no job registered for task type '{0}'")]
    UnknownJob(String),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a tick did after the watchdog pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// Nothing to run.
    Idle,
    /// The only candidate is a queued run whose interval has not elapsed.
    NotDue { task_id: TaskId },
    /// Another invocation owns the slot; nothing was changed.
    Contended { task_id: TaskId },
    /// One slice ran, leaving the task in `status`.
    Ran { task_id: TaskId, status: TaskStatus },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Tasks stopped by the watchdog during this tick.
    pub reclaimed: Vec<TaskId>,
    #[serde(flatten)]
    pub outcome: TickOutcome,
}

pub struct Scheduler {
    ctx: SyncContext,
    jobs: BTreeMap<String, Arc<dyn Job>>,
    follow_up: Arc<dyn FollowUp>,
    config: SchedulerConfig,
    watchdog: Watchdog,
}

impl Scheduler {
    pub fn builder(ctx: SyncContext) -> SchedulerBuilder {
        SchedulerBuilder::new(ctx)
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Registered task types, in name order.
    pub fn job_types(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    /// Queue a run of `task_type` unless one is already queued, running or
    /// paused, in which case that task's id is returned.
    ///
    /// An `Immediate` request upgrades a pending `Normal` task that is still
    /// queued, so it no longer waits for the run interval.
    pub async fn request_run(
        &self,
        task_type: &str,
        priority: Priority,
    ) -> Result<TaskId, SchedulerError> {
        if !self.jobs.contains_key(task_type) {
            return Err(SchedulerError::UnknownJob(task_type.to_string()));
        }

        let new = NewTask::new(task_type, self.ctx.ids.next_run_id(), self.ctx.clock.now())
            .priority(priority);
        let (task, created) = self.ctx.tasks.create_unless_pending(new).await?;
        if created {
            info!(
                task_id = %task.id,
                task_type = %task.task_type,
                run_id = %task.run_id,
                priority = task.priority.as_str(),
                "Queued run"
            );
        } else if priority == Priority::Immediate
            && task.status == TaskStatus::Queued
            && task.priority == Priority::Normal
            && self
                .ctx
                .tasks
                .raise_priority(task.id, self.ctx.clock.now())
                .await?
        {
            info!(task_id = %task.id, task_type = %task.task_type, "Raised pending run to immediate");
        } else {
            debug!(task_id = %task.id, task_type = %task.task_type, status = %task.status, "Run already pending");
        }
        Ok(task.id)
    }

    /// One scheduling pass.
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let reclaimed = self.watchdog.sweep().await?;
        self.check_overdue().await?;
        let outcome = self.run_next().await?;
        Ok(TickReport { reclaimed, outcome })
    }

    /// Force a task to `Stopped` and release its lock. Terminal tasks are
    /// left as they are.
    pub async fn terminate(&self, id: TaskId) -> Result<TaskId, SchedulerError> {
        let task = self
            .ctx
            .tasks
            .get(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(id))?;
        self.stop(&task).await?;
        Ok(id)
    }

    /// Terminate every non-terminal task sharing the run of `id`.
    ///
    /// Returns the ids that were stopped.
    pub async fn terminate_cascade(&self, id: TaskId) -> Result<Vec<TaskId>, SchedulerError> {
        let task = self
            .ctx
            .tasks
            .get(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(id))?;
        let related = self
            .ctx
            .tasks
            .list(
                &TaskFilter::new()
                    .run_id(task.run_id.clone())
                    .statuses(&TaskStatus::PENDING),
            )
            .await?;

        let mut stopped = Vec::with_capacity(related.len());
        for task in &related {
            if self.stop(task).await? {
                stopped.push(task.id);
            }
        }
        Ok(stopped)
    }

    pub async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, SchedulerError> {
        Ok(self.ctx.tasks.list(filter).await?)
    }

    /// Delete every task in `status`, releasing locks the deleted rows held.
    pub async fn purge(&self, status: TaskStatus) -> Result<u64, SchedulerError> {
        let doomed = if status.is_active() {
            self.ctx
                .tasks
                .list(&TaskFilter::new().status(status))
                .await?
        } else {
            Vec::new()
        };

        let deleted = self.ctx.tasks.delete_by_status(status).await?;
        for task in &doomed {
            self.ctx
                .locks
                .release_owned(&task.task_type, &task.lock_holder())
                .await?;
        }
        info!(status = %status, deleted, "Purged tasks");
        Ok(deleted)
    }

    pub async fn advisories(&self) -> Result<Vec<Advisory>, SchedulerError> {
        Ok(self.ctx.advisories.list().await?)
    }

    async fn stop(&self, task: &Task) -> Result<bool, SchedulerError> {
        if task.status.is_terminal() {
            return Ok(false);
        }
        let now = self.ctx.clock.now();
        match self
            .ctx
            .tasks
            .update_status(task.id, TaskStatus::Stopped, Some(TERMINATED_MESSAGE), now)
            .await
        {
            Ok(()) => {}
            // Finished or stopped since it was read.
            Err(StoreError::InvalidTransition { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        self.ctx
            .locks
            .release_owned(&task.task_type, &task.lock_holder())
            .await?;
        info!(task_id = %task.id, task_type = %task.task_type, "Terminated task");
        Ok(true)
    }

    async fn check_overdue(&self) -> Result<(), SchedulerError> {
        let now = self.ctx.clock.now();
        for task_type in self.jobs.keys() {
            let last = self
                .ctx
                .tasks
                .latest(task_type, TaskStatus::Finished)
                .await?;
            let (since, message) = match last {
                Some(last) => (
                    last.modified_at,
                    format!(
                        "No {} run has finished since {}",
                        task_type,
                        last.modified_at.to_rfc3339()
                    ),
                ),
                // Never finished: count from the first recorded attempt.
                None => match self.first_task(task_type).await? {
                    Some(first) => (
                        first.created_at,
                        format!("No {} run has finished yet", task_type),
                    ),
                    None => continue,
                },
            };
            if elapsed(since, now) <= self.config.overdue_after {
                continue;
            }
            if self
                .ctx
                .advisories
                .get(AdvisoryKind::SyncOverdue, task_type)
                .await?
                .is_some()
            {
                continue;
            }
            warn!(task_type = %task_type, "Sync overdue");
            if let Err(e) = self
                .ctx
                .advisories
                .raise(AdvisoryKind::SyncOverdue, task_type, &message, now)
                .await
            {
                warn!(task_type = %task_type, error = %e, "Failed to raise advisory");
            }
        }
        Ok(())
    }

    async fn first_task(&self, task_type: &str) -> Result<Option<Task>, SchedulerError> {
        let tasks = self
            .ctx
            .tasks
            .list(&TaskFilter::new().task_type(task_type))
            .await?;
        Ok(tasks.into_iter().next())
    }

    async fn is_due(&self, task: &Task) -> Result<bool, SchedulerError> {
        if task.priority == Priority::Immediate {
            return Ok(true);
        }
        let last = self
            .ctx
            .tasks
            .latest(&task.task_type, TaskStatus::Finished)
            .await?;
        Ok(match last {
            None => true,
            Some(last) => {
                elapsed(last.created_at, self.ctx.clock.now()) >= self.config.run_interval
            }
        })
    }

    async fn run_next(&self) -> Result<TickOutcome, SchedulerError> {
        let candidates = self
            .ctx
            .tasks
            .list(&TaskFilter::new().statuses(&[TaskStatus::Paused, TaskStatus::Queued]))
            .await?;

        let mut not_due = None;
        let mut contended = None;
        for task in candidates {
            let Some(job) = self.jobs.get(&task.task_type) else {
                continue;
            };
            if task.status == TaskStatus::Queued && !self.is_due(&task).await? {
                debug!(task_id = %task.id, task_type = %task.task_type, "Queued run not due yet");
                not_due.get_or_insert(task.id);
                continue;
            }
            match self.claim_and_run(task, job.clone()).await? {
                // Another type may still be runnable.
                TickOutcome::Contended { task_id } => {
                    contended.get_or_insert(task_id);
                }
                ran => return Ok(ran),
            }
        }

        Ok(match (contended, not_due) {
            (Some(task_id), _) => TickOutcome::Contended { task_id },
            (None, Some(task_id)) => TickOutcome::NotDue { task_id },
            (None, None) => TickOutcome::Idle,
        })
    }

    async fn claim_and_run(
        &self,
        task: Task,
        job: Arc<dyn Job>,
    ) -> Result<TickOutcome, SchedulerError> {
        let holder = task.lock_holder();
        let now = self.ctx.clock.now();

        // Lock first: a slot owned by another task is left untouched.
        if !self
            .ctx
            .locks
            .try_acquire(&task.task_type, &holder, now)
            .await?
        {
            debug!(task_id = %task.id, task_type = %task.task_type, "Lock held elsewhere");
            return Ok(TickOutcome::Contended { task_id: task.id });
        }
        // A concurrent tick claiming the same task shares the holder name;
        // whoever loses this CAS backs off and leaves the lock to the winner.
        if !self
            .ctx
            .tasks
            .transition(task.id, task.status, TaskStatus::Running, None, now)
            .await?
        {
            debug!(task_id = %task.id, "Claim lost");
            self.release_if_settled(&task).await?;
            return Ok(TickOutcome::Contended { task_id: task.id });
        }
        // The listed row may predate a slice another tick ran since.
        let resumed = task.status == TaskStatus::Paused;
        let task = self
            .ctx
            .tasks
            .get(task.id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(task.id))?;

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            run_id = %task.run_id,
            resumed,
            "Claimed task"
        );

        let ctx = RunContext {
            task_id: task.id,
            run_id: task.run_id.clone(),
        };
        let outcome = AssertUnwindSafe(job.run(&ctx, task.checkpoint.clone()))
            .catch_unwind()
            .await;

        let status = match outcome {
            Ok(Ok((checkpoint, result))) => {
                self.ctx
                    .tasks
                    .update_checkpoint(task.id, &checkpoint, self.ctx.clock.now())
                    .await?;
                match result {
                    PipelineResult::Continue => {
                        let message = job
                            .progress(&checkpoint)
                            .unwrap_or_else(|| IN_PROGRESS_MESSAGE.to_string());
                        self.pause(&task, &message).await?
                    }
                    PipelineResult::Done => self.finish(&task).await?,
                    PipelineResult::Failed(reason) => self.fail(&task, &reason).await?,
                }
            }
            Ok(Err(e)) => self.fail(&task, &format!("{:#}", e)).await?,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                self.fail(&task, &format!("job panicked: {}", reason)).await?
            }
        };

        Ok(TickOutcome::Ran {
            task_id: task.id,
            status,
        })
    }

    async fn pause(&self, task: &Task, message: &str) -> Result<TaskStatus, SchedulerError> {
        let now = self.ctx.clock.now();
        if !self
            .ctx
            .tasks
            .transition(task.id, TaskStatus::Running, TaskStatus::Paused, Some(message), now)
            .await?
        {
            return self.settled_elsewhere(task).await;
        }
        debug!(task_id = %task.id, progress = message, "Paused task");

        let paused = Task {
            status: TaskStatus::Paused,
            message: Some(message.to_string()),
            ..task.clone()
        };
        if let Err(e) = self.follow_up.arrange(&paused).await {
            warn!(task_id = %task.id, error = %e, "Failed to arrange follow-up");
        }
        Ok(TaskStatus::Paused)
    }

    async fn finish(&self, task: &Task) -> Result<TaskStatus, SchedulerError> {
        let now = self.ctx.clock.now();
        let finished = self
            .ctx
            .tasks
            .transition(
                task.id,
                TaskStatus::Running,
                TaskStatus::Finished,
                Some(FINISHED_MESSAGE),
                now,
            )
            .await?;
        self.ctx
            .locks
            .release_owned(&task.task_type, &task.lock_holder())
            .await?;
        if !finished {
            return self.settled_elsewhere(task).await;
        }

        let resolved = self.ctx.advisories.resolve(&task.task_type).await?;
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            resolved_advisories = resolved,
            "Finished task"
        );
        Ok(TaskStatus::Finished)
    }

    async fn fail(&self, task: &Task, reason: &str) -> Result<TaskStatus, SchedulerError> {
        let now = self.ctx.clock.now();
        let stopped = self
            .ctx
            .tasks
            .transition(task.id, TaskStatus::Running, TaskStatus::Stopped, Some(reason), now)
            .await?;
        self.ctx
            .locks
            .release_owned(&task.task_type, &task.lock_holder())
            .await?;
        if !stopped {
            return self.settled_elsewhere(task).await;
        }

        warn!(task_id = %task.id, task_type = %task.task_type, reason, "Task stopped");
        self.ctx
            .advisories
            .raise(AdvisoryKind::SyncFailed, &task.task_type, reason, now)
            .await?;
        Ok(TaskStatus::Stopped)
    }

    /// Drop the lock just taken for a task that settled since it was listed.
    async fn release_if_settled(&self, task: &Task) -> Result<(), SchedulerError> {
        let settled = match self.ctx.tasks.get(task.id).await? {
            Some(current) => current.status.is_terminal(),
            None => true,
        };
        if settled {
            self.ctx
                .locks
                .release_owned(&task.task_type, &task.lock_holder())
                .await?;
            debug!(task_id = %task.id, "Released lock of settled task");
        }
        Ok(())
    }

    /// The task left `Running` while its slice ran (terminated or reclaimed).
    async fn settled_elsewhere(&self, task: &Task) -> Result<TaskStatus, SchedulerError> {
        let current = self
            .ctx
            .tasks
            .get(task.id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(task.id))?;
        info!(
            task_id = %task.id,
            status = %current.status,
            "Task changed state during its slice, result discarded"
        );
        Ok(current.status)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
