use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::Scheduler;
use crate::task::Priority;

/// In-process trigger for hosts that run as a persistent process.
///
/// Every `interval` it requests a `Normal` run of each registered type and
/// ticks. A wake-up from a [`NotifyFollowUp`](super::NotifyFollowUp) ticks
/// right away, so a paused run continues without waiting a full period.
pub struct TickLoop {
    scheduler: Arc<Scheduler>,
    interval: Duration,
    wake: Arc<Notify>,
    run_on_start: bool,
}

impl TickLoop {
    pub fn new(scheduler: Arc<Scheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            wake: Arc::new(Notify::new()),
            run_on_start: false,
        }
    }

    pub fn wake_on(mut self, notify: Arc<Notify>) -> Self {
        self.wake = notify;
        self
    }

    /// Whether to request and tick once before the first period elapses.
    ///
    /// Defaults to false.
    pub fn run_on_start(mut self, run: bool) -> Self {
        self.run_on_start = run;
        self
    }

    /// Run indefinitely.
    pub async fn run(&self) -> ! {
        info!(
            interval_secs = self.interval.as_secs(),
            run_on_start = self.run_on_start,
            jobs = ?self.scheduler.job_types(),
            "Starting tick loop"
        );

        if self.run_on_start {
            self.periodic().await;
        }

        let mut ticker = interval(self.interval);
        ticker.tick().await; // Consume immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => self.periodic().await,
                _ = self.wake.notified() => {
                    debug!("Follow-up wake");
                    self.tick().await;
                }
            }
        }
    }

    async fn periodic(&self) {
        for task_type in self.scheduler.job_types() {
            if let Err(e) = self.scheduler.request_run(task_type, Priority::Normal).await {
                error!(task_type, error = %e, "Failed to request run");
            }
        }
        self.tick().await;
    }

    async fn tick(&self) {
        match self.scheduler.tick().await {
            Ok(report) => debug!(outcome = ?report.outcome, reclaimed = report.reclaimed.len(), "Tick"),
            Err(e) => error!(error = %e, "Tick failed"),
        }
    }
}
