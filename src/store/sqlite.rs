//! SQLite implementation of TaskStore.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::{StoreError, TaskStore};
use crate::task::{Checkpoint, NewTask, Priority, RunId, Task, TaskFilter, TaskId, TaskStatus};

const TASK_COLUMNS: &str =
    "id, task_type, status, priority, message, checkpoint, run_id, created_at, modified_at";

type TaskRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
);

pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Fixed-width UTC timestamps so that text comparison matches time order.
pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {:?}: {}", raw, e)))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn row_to_task(row: TaskRow) -> Result<Task, StoreError> {
    let (id, task_type, status, priority, message, checkpoint, run_id, created_at, modified_at) =
        row;
    let checkpoint: serde_json::Value = serde_json::from_str(&checkpoint)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(Task {
        id: TaskId(id),
        task_type,
        status: status.parse().map_err(StoreError::Serialization)?,
        priority: priority.parse::<Priority>().map_err(StoreError::Serialization)?,
        message,
        created_at: parse_ts(&created_at)?,
        modified_at: parse_ts(&modified_at)?,
        checkpoint: Checkpoint::from_value(checkpoint),
        run_id: RunId::new(run_id),
    })
}

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Create a new SqliteTaskStore.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run migrations to create the tasks table.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_tasks (
                id INTEGER PRIMARY KEY,
                task_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                priority TEXT NOT NULL DEFAULT 'normal',
                message TEXT,
                checkpoint TEXT NOT NULL DEFAULT 'null',
                run_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_tasks_status
            ON sync_tasks(status, task_type)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_sync_tasks_run
            ON sync_tasks(run_id)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn status_of(&self, id: TaskId) -> Result<Option<TaskStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM sync_tasks WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        status
            .map(|s| s.parse().map_err(StoreError::Serialization))
            .transpose()
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
        let created_at = format_ts(task.created_at);
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sync_tasks (task_type, status, priority, message, run_id, created_at, modified_at)
            VALUES (?, 'queued', ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&task.task_type)
        .bind(task.priority.as_str())
        .bind(task.message.as_deref())
        .bind(task.run_id.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(task.into_task(TaskId(id)))
    }

    async fn create_unless_pending(&self, task: NewTask) -> Result<(Task, bool), StoreError> {
        let created_at = format_ts(task.created_at);
        loop {
            // One statement, so two racing requests cannot both insert.
            let id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO sync_tasks (task_type, status, priority, message, run_id, created_at, modified_at)
                SELECT ?, 'queued', ?, ?, ?, ?, ?
                WHERE NOT EXISTS (
                    SELECT 1 FROM sync_tasks
                    WHERE task_type = ? AND status IN ('queued', 'running', 'paused')
                )
                RETURNING id
                "#,
            )
            .bind(&task.task_type)
            .bind(task.priority.as_str())
            .bind(task.message.as_deref())
            .bind(task.run_id.as_str())
            .bind(&created_at)
            .bind(&created_at)
            .bind(&task.task_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            if let Some(id) = id {
                return Ok((task.into_task(TaskId(id)), true));
            }

            let existing = self
                .list(
                    &TaskFilter::new()
                        .task_type(task.task_type.clone())
                        .statuses(&TaskStatus::PENDING),
                )
                .await?
                .into_iter()
                .next();
            if let Some(existing) = existing {
                return Ok((existing, false));
            }
            // The pending task settled between the two statements; retry the guarded insert.
        }
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let query = format!("SELECT {} FROM sync_tasks WHERE id = ?", TASK_COLUMNS);
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(row_to_task).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let mut clauses = Vec::new();
        if !filter.statuses.is_empty() {
            clauses.push(format!("status IN ({})", placeholders(filter.statuses.len())));
        }
        if filter.task_type.is_some() {
            clauses.push("task_type = ?".to_string());
        }
        if filter.id.is_some() {
            clauses.push("id = ?".to_string());
        }
        if filter.run_id.is_some() {
            clauses.push("run_id = ?".to_string());
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let select_query = format!(
            "SELECT {} FROM sync_tasks {} ORDER BY id",
            TASK_COLUMNS, where_clause
        );
        let mut select = sqlx::query_as::<_, TaskRow>(&select_query);
        for status in &filter.statuses {
            select = select.bind(status.as_str());
        }
        if let Some(task_type) = &filter.task_type {
            select = select.bind(task_type.as_str());
        }
        if let Some(id) = filter.id {
            select = select.bind(id.0);
        }
        if let Some(run_id) = &filter.run_id {
            select = select.bind(run_id.as_str());
        }

        let rows = select.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.into_iter().map(row_to_task).collect()
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let allowed = TaskStatus::predecessors(status);
        let update_query = format!(
            r#"
            UPDATE sync_tasks
            SET status = ?, message = COALESCE(?, message), modified_at = MAX(modified_at, ?)
            WHERE id = ? AND status IN ({})
            "#,
            placeholders(allowed.len())
        );
        let mut update = sqlx::query(&update_query)
            .bind(status.as_str())
            .bind(message)
            .bind(format_ts(at))
            .bind(id.0);
        for from in &allowed {
            update = update.bind(from.as_str());
        }
        let result = update.execute(&self.pool).await.map_err(db_err)?;

        if result.rows_affected() == 0 {
            return match self.status_of(id).await? {
                None => Err(StoreError::NotFound(id)),
                Some(from) => Err(StoreError::InvalidTransition {
                    id,
                    from,
                    to: status,
                }),
            };
        }
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

        let result = sqlx::query(
            r#"
            UPDATE sync_tasks
            SET status = ?, message = COALESCE(?, message), modified_at = MAX(modified_at, ?)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(message)
        .bind(format_ts(at))
        .bind(id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.status_of(id).await? {
            None => Err(StoreError::NotFound(id)),
            Some(_) => Ok(false),
        }
    }

    async fn raise_priority(&self, id: TaskId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_tasks
            SET priority = 'immediate', modified_at = MAX(modified_at, ?)
            WHERE id = ? AND status = 'queued' AND priority != 'immediate'
            "#,
        )
        .bind(format_ts(at))
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.status_of(id).await? {
            None => Err(StoreError::NotFound(id)),
            Some(_) => Ok(false),
        }
    }

    async fn update_checkpoint(
        &self,
        id: TaskId,
        checkpoint: &Checkpoint,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(checkpoint)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE sync_tasks
            SET checkpoint = ?, modified_at = MAX(modified_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(encoded)
        .bind(format_ts(at))
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_by_status(&self, status: TaskStatus) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sync_tasks WHERE status = ?")
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
