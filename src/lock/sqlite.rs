//! SQLite implementation of LockManager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::LockManager;
use crate::store::{db_err, format_ts, StoreError};

/// SQLite-backed lock table. One row per held lock.
#[derive(Clone)]
pub struct SqliteLockManager {
    pool: SqlitePool,
}

impl SqliteLockManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run migrations to create the locks table.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_locks (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl LockManager for SqliteLockManager {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // Insert when free; refresh only when the same holder asks again.
        let result = sqlx::query(
            r#"
            INSERT INTO sync_locks (name, holder, acquired_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET acquired_at = excluded.acquired_at
            WHERE sync_locks.holder = excluded.holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(format_ts(at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_locks WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn release_owned(&self, name: &str, holder: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sync_locks WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn holder(&self, name: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("SELECT holder FROM sync_locks WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }
}
