//! End-to-end runs against SQLite-backed stores.

mod common;

use std::sync::Arc;
use std::time::Duration;

use syncflow::{
    ApiClient, EntityStorage, FetchEntities, ManualClock, MemoryEntityStorage, Pipeline,
    Priority, ReconcileDeletions, Scheduler, SequentialRunIds, SqliteRecorder, SyncContext,
    TaskFilter, TaskStatus, TickOutcome,
};

use common::{manual_clock, memory_pool, CountingJob, PagedApi};

fn import_pipeline(
    api: Arc<dyn ApiClient>,
    storage: Arc<dyn EntityStorage>,
    clock: Arc<ManualClock>,
    recorder: SqliteRecorder,
) -> Pipeline {
    Pipeline::new("import")
        .step(FetchEntities::new("venues", api.clone(), storage.clone()))
        .step(FetchEntities::new("events", api, storage.clone()))
        .step(ReconcileDeletions::new(["venues", "events"], storage))
        .with_budget(Duration::from_secs(25))
        .with_recorder(recorder)
        .with_clock(clock)
}

async fn sqlite_context(pool: sqlx::SqlitePool, clock: Arc<ManualClock>) -> SyncContext {
    SyncContext::sqlite(pool)
        .await
        .unwrap()
        .with_clock(clock)
        .with_ids(Arc::new(SequentialRunIds::new()))
}

/// Everything that outlives a single invocation.
struct Host {
    pool: sqlx::SqlitePool,
    clock: Arc<ManualClock>,
    api: Arc<PagedApi>,
    storage: Arc<MemoryEntityStorage>,
    recorder: SqliteRecorder,
}

impl Host {
    /// A scheduler built from scratch, as a serverless host would per tick.
    async fn invocation(&self) -> Scheduler {
        let ctx = sqlite_context(self.pool.clone(), self.clock.clone()).await;
        Scheduler::builder(ctx)
            .job(import_pipeline(
                self.api.clone(),
                self.storage.clone(),
                self.clock.clone(),
                self.recorder.clone(),
            ))
            .build()
    }
}

#[tokio::test]
async fn test_import_survives_fresh_invocations() {
    let pool = memory_pool().await;
    let clock = manual_clock();
    let api = Arc::new(
        PagedApi::new()
            .with_pages("venues", 4, 5)
            .with_pages("events", 6, 10)
            .advancing(clock.clone(), Duration::from_secs(10)),
    );
    let storage = Arc::new(MemoryEntityStorage::new());
    let recorder = SqliteRecorder::new(pool.clone());
    recorder.run_migrations().await.unwrap();

    let host = Host {
        pool: pool.clone(),
        clock: clock.clone(),
        api: api.clone(),
        storage: storage.clone(),
        recorder,
    };

    let id = host
        .invocation()
        .await
        .request_run("import", Priority::Normal)
        .await
        .unwrap();

    let mut slices = 0;
    loop {
        let report = host.invocation().await.tick().await.unwrap();
        slices += 1;
        match report.outcome {
            TickOutcome::Ran {
                status: TaskStatus::Paused,
                ..
            } => assert!(slices < 20, "import never finished"),
            TickOutcome::Ran {
                task_id,
                status: TaskStatus::Finished,
            } => {
                assert_eq!(task_id, id);
                break;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert!(slices > 1);
    let snapshot = storage.snapshot();
    assert_eq!(snapshot["venues"].len(), 20);
    assert_eq!(snapshot["events"].len(), 60);
    assert_eq!(api.calls().len(), 4 + 6);

    let scheduler = host.invocation().await;
    let tasks = scheduler.query(&TaskFilter::new()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].message.as_deref(), Some("Import finished"));
    assert!(!scheduler.context().locks.is_held("import").await.unwrap());

    let recorded: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM sync_slices WHERE run_id = 'run-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(recorded.0, slices);
}

#[tokio::test]
async fn test_concurrent_ticks_never_overlap_slices() {
    let pool = memory_pool().await;
    let ctx = sqlite_context(pool, manual_clock()).await;
    let scheduler = Arc::new(
        Scheduler::builder(ctx)
            .job(CountingJob::new("import", 100))
            .build(),
    );
    let id = scheduler.request_run("import", Priority::Normal).await.unwrap();

    let ticks = (0..8).map(|_| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.tick().await.unwrap() })
    });
    let reports = futures::future::join_all(ticks).await;

    let ran = reports
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|r| matches!(r.outcome, TickOutcome::Ran { .. }))
        .count() as u64;
    assert!(ran >= 1);

    // Every slice that ran saw the checkpoint of the one before it
    let task = scheduler.context().tasks.get(id).await.unwrap().unwrap();
    assert_eq!(CountingJob::done_of(&task.checkpoint), ran);
    assert_eq!(task.status, TaskStatus::Paused);

    let pending = scheduler
        .query(&TaskFilter::new().statuses(&TaskStatus::PENDING))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_racing_requests_keep_one_pending_task() {
    let pool = memory_pool().await;
    let ctx = sqlite_context(pool, manual_clock()).await;
    let scheduler = Arc::new(
        Scheduler::builder(ctx)
            .job(CountingJob::new("import", 1))
            .build(),
    );

    for _ in 0..10 {
        // Ticks finish pending runs while requests race to queue the next one
        let calls = (0..6).map(|i| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                if i % 3 == 0 {
                    scheduler.tick().await.unwrap();
                }
                scheduler
                    .request_run("import", Priority::Immediate)
                    .await
                    .unwrap()
            })
        });
        for call in futures::future::join_all(calls).await {
            call.unwrap();
        }

        let pending = scheduler
            .query(&TaskFilter::new().statuses(&TaskStatus::PENDING))
            .await
            .unwrap();
        assert!(pending.len() <= 1, "{} pending", pending.len());
    }
}
