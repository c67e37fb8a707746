//! SQLite-based recorder implementation.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::recorder::{Recorder, SliceId, SliceStatus, StepId, StepStatus};
use crate::task::{RunId, TaskId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_slices (
    id INTEGER PRIMARY KEY,
    pipeline_name TEXT NOT NULL,
    run_id TEXT NOT NULL,
    task_id INTEGER NOT NULL,
    started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    completed_at TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS sync_steps (
    id INTEGER PRIMARY KEY,
    slice_id INTEGER NOT NULL REFERENCES sync_slices(id),
    step_name TEXT NOT NULL,
    step_index INTEGER NOT NULL,
    started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    completed_at TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    attempt INTEGER NOT NULL DEFAULT 1,
    cursor TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_slices_run ON sync_slices(run_id, started_at);
CREATE INDEX IF NOT EXISTS idx_sync_steps_slice ON sync_steps(slice_id);
"#;

/// SQLite-based recorder for import history.
#[derive(Clone)]
pub struct SqliteRecorder {
    pool: SqlitePool,
}

impl SqliteRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `sync_slices` and `sync_steps` tables.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        for statement in SCHEMA.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Recorder for SqliteRecorder {
    async fn start_slice(
        &self,
        pipeline_name: &str,
        run_id: &RunId,
        task_id: TaskId,
    ) -> anyhow::Result<SliceId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO sync_slices (pipeline_name, run_id, task_id) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(pipeline_name)
        .bind(run_id.as_str())
        .bind(task_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(SliceId(id))
    }

    async fn start_step(
        &self,
        slice_id: SliceId,
        step_name: &str,
        step_index: u32,
    ) -> anyhow::Result<StepId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO sync_steps (slice_id, step_name, step_index) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(slice_id.0)
        .bind(step_name)
        .bind(step_index as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(StepId(id))
    }

    async fn complete_step(&self, step_id: StepId, status: StepStatus) -> anyhow::Result<()> {
        let (status_str, cursor, error_msg, attempt) = match status {
            StepStatus::Completed => ("completed", None, None, 1u32),
            StepStatus::Suspended { cursor } => ("suspended", cursor, None, 1),
            StepStatus::Failed { error, attempt } => ("failed", None, Some(error), attempt),
        };

        sqlx::query(
            r#"
            UPDATE sync_steps
            SET completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                status = ?, cursor = ?, error_message = ?, attempt = ?
            WHERE id = ?
            "#,
        )
        .bind(status_str)
        .bind(cursor)
        .bind(error_msg)
        .bind(attempt as i64)
        .bind(step_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_slice(&self, slice_id: SliceId, status: SliceStatus) -> anyhow::Result<()> {
        let (status_str, error_msg) = match status {
            SliceStatus::Completed => ("completed", None),
            SliceStatus::Suspended => ("suspended", None),
            SliceStatus::Failed { error } => ("failed", Some(error)),
        };

        sqlx::query(
            r#"
            UPDATE sync_slices
            SET completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), status = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(status_str)
        .bind(error_msg)
        .bind(slice_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
