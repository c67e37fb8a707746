use std::collections::BTreeMap;
use std::sync::Arc;

use super::follow_up::{FollowUp, NoFollowUp};
use super::Scheduler;
use crate::config::SchedulerConfig;
use crate::context::SyncContext;
use crate::job::Job;
use crate::watchdog::Watchdog;

/// Builder for configuring a [`Scheduler`].
pub struct SchedulerBuilder {
    ctx: SyncContext,
    jobs: BTreeMap<String, Arc<dyn Job>>,
    follow_up: Arc<dyn FollowUp>,
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            jobs: BTreeMap::new(),
            follow_up: Arc::new(NoFollowUp),
            config: SchedulerConfig::default(),
        }
    }

    /// Register a job under its [`Job::name`].
    ///
    /// Registering a second job with the same name replaces the first.
    pub fn job<J: Job + 'static>(self, job: J) -> Self {
        self.shared_job(Arc::new(job))
    }

    pub fn shared_job(mut self, job: Arc<dyn Job>) -> Self {
        self.jobs.insert(job.name().to_string(), job);
        self
    }

    pub fn follow_up<F: FollowUp + 'static>(mut self, follow_up: F) -> Self {
        self.follow_up = Arc::new(follow_up);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Scheduler {
        let watchdog =
            Watchdog::new(&self.ctx, self.config.stale_after).manage(self.jobs.keys().cloned());
        Scheduler {
            ctx: self.ctx,
            jobs: self.jobs,
            follow_up: self.follow_up,
            config: self.config,
            watchdog,
        }
    }
}
