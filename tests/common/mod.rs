//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::Notify;

use syncflow::{
    ApiClient, Checkpoint, Clock, FetchError, Filters, Job, ManualClock, Page, PipelineResult,
    Record, RunContext, SequentialRunIds, SyncContext,
};

pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

/// In-memory context on a manual clock with predictable run ids.
pub fn memory_context(clock: Arc<ManualClock>) -> SyncContext {
    SyncContext::in_memory()
        .with_clock(clock)
        .with_ids(Arc::new(SequentialRunIds::new()))
}

/// Paginated API over fixed pages. Cursors are `p1`, `p2`, ...; the first
/// request (no cursor) returns `p1`.
#[derive(Default)]
pub struct PagedApi {
    pages: HashMap<String, Vec<Vec<Record>>>,
    failures: Mutex<HashMap<(String, String), VecDeque<FetchError>>>,
    calls: Mutex<Vec<(String, String)>>,
    clock: Option<(Arc<ManualClock>, Duration)>,
}

impl PagedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` pages of `per_page` records each, ids `<type>-<page>-<n>`.
    pub fn with_pages(mut self, entity_type: &str, count: usize, per_page: usize) -> Self {
        let pages = (1..=count)
            .map(|page| {
                (0..per_page)
                    .map(|n| {
                        Record::new(
                            format!("{}-{}-{}", entity_type, page, n),
                            json!({"page": page, "n": n}),
                        )
                    })
                    .collect()
            })
            .collect();
        self.pages.insert(entity_type.to_string(), pages);
        self
    }

    /// Every fetch advances `clock` by `per_fetch`.
    pub fn advancing(mut self, clock: Arc<ManualClock>, per_fetch: Duration) -> Self {
        self.clock = Some((clock, per_fetch));
        self
    }

    /// Fail the next fetch of `cursor` with `error`. Queued errors are used in order.
    pub fn fail_at(&self, entity_type: &str, cursor: &str, error: FetchError) {
        self.failures
            .lock()
            .unwrap()
            .entry((entity_type.to_string(), cursor.to_string()))
            .or_default()
            .push_back(error);
    }

    /// Cursors requested so far, as `(entity_type, cursor)`.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiClient for PagedApi {
    async fn fetch_page(
        &self,
        entity_type: &str,
        cursor: Option<&str>,
        _filters: &Filters,
    ) -> Result<Page, FetchError> {
        let cursor = cursor.unwrap_or("p1").to_string();
        self.calls
            .lock()
            .unwrap()
            .push((entity_type.to_string(), cursor.clone()));
        if let Some((clock, step)) = &self.clock {
            clock.advance(*step);
        }

        let injected = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(entity_type.to_string(), cursor.clone()))
            .and_then(|q| q.pop_front());
        if let Some(error) = injected {
            return Err(error);
        }

        let pages = self
            .pages
            .get(entity_type)
            .ok_or_else(|| FetchError::Fatal(format!("unknown entity type {}", entity_type)))?;
        let index: usize = cursor
            .strip_prefix('p')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| FetchError::Fatal(format!("bad cursor {}", cursor)))?;
        let records = index
            .checked_sub(1)
            .and_then(|i| pages.get(i))
            .cloned()
            .ok_or_else(|| FetchError::Fatal(format!("no page {}", cursor)))?;
        let next_cursor = (index < pages.len()).then(|| format!("p{}", index + 1));

        Ok(Page {
            records,
            next_cursor,
        })
    }
}

/// Job that needs `slices` slices to finish, counting in its checkpoint.
pub struct CountingJob {
    name: &'static str,
    slices: u64,
    clock: Option<(Arc<ManualClock>, Duration)>,
}

impl CountingJob {
    pub fn new(name: &'static str, slices: u64) -> Self {
        Self {
            name,
            slices,
            clock: None,
        }
    }

    /// Every slice advances `clock` by `per_slice`.
    pub fn advancing(mut self, clock: Arc<ManualClock>, per_slice: Duration) -> Self {
        self.clock = Some((clock, per_slice));
        self
    }

    pub fn done_of(checkpoint: &Checkpoint) -> u64 {
        checkpoint.as_value()["done"].as_u64().unwrap_or(0)
    }
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        checkpoint: Checkpoint,
    ) -> anyhow::Result<(Checkpoint, PipelineResult)> {
        if let Some((clock, step)) = &self.clock {
            clock.advance(*step);
        }
        let done = Self::done_of(&checkpoint) + 1;
        let next = Checkpoint::from_value(json!({ "done": done }));
        let result = if done >= self.slices {
            PipelineResult::Done
        } else {
            PipelineResult::Continue
        };
        Ok((next, result))
    }

    fn progress(&self, checkpoint: &Checkpoint) -> Option<String> {
        Some(format!("{}/{} slices", Self::done_of(checkpoint), self.slices))
    }
}

/// How a [`BrokenJob`] misbehaves.
pub enum Breakage {
    Failed(&'static str),
    Error(&'static str),
    Panic(&'static str),
}

pub struct BrokenJob {
    pub name: &'static str,
    pub breakage: Breakage,
}

#[async_trait]
impl Job for BrokenJob {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        checkpoint: Checkpoint,
    ) -> anyhow::Result<(Checkpoint, PipelineResult)> {
        match self.breakage {
            Breakage::Failed(reason) => Ok((checkpoint, PipelineResult::Failed(reason.into()))),
            Breakage::Error(msg) => Err(anyhow::anyhow!(msg)),
            Breakage::Panic(msg) => panic!("{}", msg),
        }
    }
}

/// Job that blocks inside its slice until released.
pub struct GatedJob {
    pub name: &'static str,
    /// Notified once the slice has started.
    pub entered: Arc<Notify>,
    /// The slice returns once this is notified.
    pub release: Arc<Notify>,
    pub result: PipelineResult,
}

impl GatedJob {
    pub fn new(name: &'static str, result: PipelineResult) -> Self {
        Self {
            name,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            result,
        }
    }
}

#[async_trait]
impl Job for GatedJob {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _checkpoint: Checkpoint,
    ) -> anyhow::Result<(Checkpoint, PipelineResult)> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok((
            Checkpoint::from_value(json!({"gated": true})),
            self.result.clone(),
        ))
    }
}

/// Current time of a context's clock.
pub fn now(ctx: &SyncContext) -> chrono::DateTime<Utc> {
    ctx.clock.now()
}
