//! Time source and run identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::task::RunId;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Time elapsed from `since` to `now`, saturating at zero when `since` is in the future.
pub fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Generates identifiers for new runs.
pub trait IdGenerator: Send + Sync {
    fn next_run_id(&self) -> RunId;
}

/// Random v4 UUIDs in simple (unhyphenated) form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRunIds;

impl IdGenerator for UuidRunIds {
    fn next_run_id(&self) -> RunId {
        RunId::new(uuid::Uuid::new_v4().simple().to_string())
    }
}

/// Predictable ids (`run-1`, `run-2`, ...).
#[derive(Debug, Default)]
pub struct SequentialRunIds {
    next: AtomicU64,
}

impl SequentialRunIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialRunIds {
    fn next_run_id(&self) -> RunId {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        RunId::new(format!("run-{}", n))
    }
}
