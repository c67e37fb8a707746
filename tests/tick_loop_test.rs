//! Tests for the in-process TickLoop driver.

mod common;

use std::sync::Arc;
use std::time::Duration;

use syncflow::{NotifyFollowUp, Scheduler, TaskFilter, TaskStatus, TickLoop};

use common::{manual_clock, memory_context, CountingJob};

async fn wait_for_finished(scheduler: &Scheduler) -> usize {
    loop {
        let finished = scheduler
            .query(&TaskFilter::new().status(TaskStatus::Finished))
            .await
            .unwrap();
        if !finished.is_empty() {
            return finished.len();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_follow_up_wakes_drive_run_to_completion() {
    let follow_up = NotifyFollowUp::new();
    let wake = follow_up.handle();
    let scheduler = Arc::new(
        Scheduler::builder(memory_context(manual_clock()))
            .job(CountingJob::new("import", 3))
            .follow_up(follow_up)
            .build(),
    );

    // The period is far longer than the test; only wake-ups can finish it
    let driver = TickLoop::new(scheduler.clone(), Duration::from_secs(3600))
        .wake_on(wake)
        .run_on_start(true);
    let handle = tokio::spawn(async move { driver.run().await });

    tokio::time::timeout(Duration::from_secs(5), wait_for_finished(&scheduler))
        .await
        .expect("run did not finish");
    handle.abort();

    let tasks = scheduler.query(&TaskFilter::new()).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(CountingJob::done_of(&tasks[0].checkpoint), 3);
}

#[tokio::test(start_paused = true)]
async fn test_period_requests_and_ticks() {
    let scheduler = Arc::new(
        Scheduler::builder(memory_context(manual_clock()))
            .job(CountingJob::new("import", 1))
            .build(),
    );
    assert!(scheduler.query(&TaskFilter::new()).await.unwrap().is_empty());

    let driver = TickLoop::new(scheduler.clone(), Duration::from_secs(60));
    let handle = tokio::spawn(async move { driver.run().await });

    let finished = wait_for_finished(&scheduler).await;
    handle.abort();

    assert_eq!(finished, 1);
}
