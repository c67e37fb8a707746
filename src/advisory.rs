//! Operator-facing advisories.
//!
//! Failures of the same kind for the same task type collapse into a single
//! advisory whose occurrence count grows, so a misconfigured import that fails
//! on every tick shows up once rather than once per tick.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    /// A run ended `Stopped`.
    SyncFailed,
    /// No run has finished for longer than the configured window.
    SyncOverdue,
}

impl AdvisoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncFailed => "sync_failed",
            Self::SyncOverdue => "sync_overdue",
        }
    }
}

impl fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AdvisoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_failed" => Ok(Self::SyncFailed),
            "sync_overdue" => Ok(Self::SyncOverdue),
            other => Err(format!("unknown advisory kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub task_type: String,
    /// Most recent message, rendered verbatim.
    pub message: String,
    pub occurrences: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[async_trait]
pub trait AdvisoryStore: Send + Sync {
    /// Record an occurrence, creating the advisory or bumping its count.
    async fn raise(
        &self,
        kind: AdvisoryKind,
        task_type: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<Advisory, StoreError>;

    async fn get(
        &self,
        kind: AdvisoryKind,
        task_type: &str,
    ) -> Result<Option<Advisory>, StoreError>;

    /// Clear every advisory for a task type. Returns how many were removed.
    async fn resolve(&self, task_type: &str) -> Result<u64, StoreError>;

    async fn list(&self) -> Result<Vec<Advisory>, StoreError>;
}

/// In-process advisory table.
#[derive(Default)]
pub struct MemoryAdvisoryStore {
    entries: Mutex<BTreeMap<(AdvisoryKind, String), Advisory>>,
}

impl MemoryAdvisoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<(AdvisoryKind, String), Advisory>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("advisory mutex poisoned".into()))
    }
}

#[async_trait]
impl AdvisoryStore for MemoryAdvisoryStore {
    async fn raise(
        &self,
        kind: AdvisoryKind,
        task_type: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<Advisory, StoreError> {
        let mut entries = self.entries()?;
        let entry = entries
            .entry((kind, task_type.to_string()))
            .and_modify(|a| {
                a.occurrences += 1;
                a.message = message.to_string();
                a.last_seen = a.last_seen.max(at);
            })
            .or_insert_with(|| Advisory {
                kind,
                task_type: task_type.to_string(),
                message: message.to_string(),
                occurrences: 1,
                first_seen: at,
                last_seen: at,
            });
        Ok(entry.clone())
    }

    async fn get(
        &self,
        kind: AdvisoryKind,
        task_type: &str,
    ) -> Result<Option<Advisory>, StoreError> {
        Ok(self
            .entries()?
            .get(&(kind, task_type.to_string()))
            .cloned())
    }

    async fn resolve(&self, task_type: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|(_, t), _| t != task_type);
        Ok((before - entries.len()) as u64)
    }

    async fn list(&self) -> Result<Vec<Advisory>, StoreError> {
        Ok(self.entries()?.values().cloned().collect())
    }
}

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteAdvisoryStore;

#[cfg(feature = "sqlite")]
mod sqlite {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::SqlitePool;

    use super::{Advisory, AdvisoryKind, AdvisoryStore};
    use crate::store::{db_err, format_ts, parse_ts, StoreError};

    type AdvisoryRow = (String, String, String, i64, String, String);

    fn row_to_advisory(row: AdvisoryRow) -> Result<Advisory, StoreError> {
        let (kind, task_type, message, occurrences, first_seen, last_seen) = row;
        Ok(Advisory {
            kind: kind.parse().map_err(StoreError::Serialization)?,
            task_type,
            message,
            occurrences: occurrences.max(0) as u32,
            first_seen: parse_ts(&first_seen)?,
            last_seen: parse_ts(&last_seen)?,
        })
    }

    /// SQLite-backed advisory table.
    #[derive(Clone)]
    pub struct SqliteAdvisoryStore {
        pool: SqlitePool,
    }

    impl SqliteAdvisoryStore {
        pub fn new(pool: SqlitePool) -> Self {
            Self { pool }
        }

        pub async fn run_migrations(&self) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS sync_advisories (
                    kind TEXT NOT NULL,
                    task_type TEXT NOT NULL,
                    message TEXT NOT NULL,
                    occurrences INTEGER NOT NULL DEFAULT 1,
                    first_seen TEXT NOT NULL,
                    last_seen TEXT NOT NULL,
                    PRIMARY KEY (kind, task_type)
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
    impl AdvisoryStore for SqliteAdvisoryStore {
        async fn raise(
            &self,
            kind: AdvisoryKind,
            task_type: &str,
            message: &str,
            at: DateTime<Utc>,
        ) -> Result<Advisory, StoreError> {
            let at = format_ts(at);
            let row = sqlx::query_as::<_, AdvisoryRow>(
                r#"
                INSERT INTO sync_advisories (kind, task_type, message, occurrences, first_seen, last_seen)
                VALUES (?, ?, ?, 1, ?, ?)
                ON CONFLICT(kind, task_type) DO UPDATE SET
                    message = excluded.message,
                    occurrences = sync_advisories.occurrences + 1,
                    last_seen = MAX(sync_advisories.last_seen, excluded.last_seen)
                RETURNING kind, task_type, message, occurrences, first_seen, last_seen
                "#,
            )
            .bind(kind.as_str())
            .bind(task_type)
            .bind(message)
            .bind(&at)
            .bind(&at)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

            row_to_advisory(row)
        }

        async fn get(
            &self,
            kind: AdvisoryKind,
            task_type: &str,
        ) -> Result<Option<Advisory>, StoreError> {
            let row = sqlx::query_as::<_, AdvisoryRow>(
                r#"
                SELECT kind, task_type, message, occurrences, first_seen, last_seen
                FROM sync_advisories WHERE kind = ? AND task_type = ?
                "#,
            )
            .bind(kind.as_str())
            .bind(task_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            row.map(row_to_advisory).transpose()
        }

        async fn resolve(&self, task_type: &str) -> Result<u64, StoreError> {
            let result = sqlx::query("DELETE FROM sync_advisories WHERE task_type = ?")
                .bind(task_type)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            Ok(result.rows_affected())
        }

        async fn list(&self) -> Result<Vec<Advisory>, StoreError> {
            let rows = sqlx::query_as::<_, AdvisoryRow>(
                r#"
                SELECT kind, task_type, message, occurrences, first_seen, last_seen
                FROM sync_advisories ORDER BY kind, task_type
                "#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            rows.into_iter().map(row_to_advisory).collect()
        }
    }
}
