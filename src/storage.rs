//! Local storage of imported domain entities.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::remote::Record;
use crate::task::RunId;

/// Upsert-based entity storage.
///
/// Every write tags the row with the import id of the run that touched it, so
/// rows left behind by an earlier import can be recognised as deleted upstream.
#[async_trait]
pub trait EntityStorage: Send + Sync {
    /// Insert or replace `records`, tagging them with `import_id`.
    async fn upsert(
        &self,
        entity_type: &str,
        import_id: &RunId,
        records: &[Record],
    ) -> anyhow::Result<()>;

    /// Delete every row of `entity_type` not touched by `import_id`.
    async fn delete_stale(&self, entity_type: &str, import_id: &RunId) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone)]
struct StoredEntity {
    data: serde_json::Value,
    import_id: RunId,
}

/// Entity storage held in memory.
#[derive(Default)]
pub struct MemoryEntityStorage {
    rows: Mutex<BTreeMap<(String, String), StoredEntity>>,
}

impl MemoryEntityStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> anyhow::Result<MutexGuard<'_, BTreeMap<(String, String), StoredEntity>>> {
        self.rows
            .lock()
            .map_err(|_| anyhow::anyhow!("entity storage mutex poisoned"))
    }

    /// Current contents, by entity type then external id.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, serde_json::Value>> {
        let rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        let mut out: BTreeMap<String, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
        for ((entity_type, id), row) in rows.iter() {
            out.entry(entity_type.clone())
                .or_default()
                .insert(id.clone(), row.data.clone());
        }
        out
    }

    /// Import id that last wrote the given row.
    pub fn import_of(&self, entity_type: &str, id: &str) -> Option<RunId> {
        let rows = self.rows.lock().unwrap_or_else(|p| p.into_inner());
        rows.get(&(entity_type.to_string(), id.to_string()))
            .map(|row| row.import_id.clone())
    }
}

#[async_trait]
impl EntityStorage for MemoryEntityStorage {
    async fn upsert(
        &self,
        entity_type: &str,
        import_id: &RunId,
        records: &[Record],
    ) -> anyhow::Result<()> {
        let mut rows = self.rows()?;
        for record in records {
            rows.insert(
                (entity_type.to_string(), record.id.clone()),
                StoredEntity {
                    data: record.data.clone(),
                    import_id: import_id.clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete_stale(&self, entity_type: &str, import_id: &RunId) -> anyhow::Result<u64> {
        let mut rows = self.rows()?;
        let before = rows.len();
        rows.retain(|(t, _), row| t != entity_type || row.import_id == *import_id);
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn rows_not_touched_by_the_import_are_stale() {
        let storage = MemoryEntityStorage::new();
        let old = RunId::new("old");
        let new = RunId::new("new");

        storage
            .upsert("events", &old, &[Record::new("e1", json!(1)), Record::new("e2", json!(2))])
            .await
            .unwrap();
        storage
            .upsert("venues", &old, &[Record::new("v1", json!("hall"))])
            .await
            .unwrap();
        storage
            .upsert("events", &new, &[Record::new("e2", json!(22))])
            .await
            .unwrap();

        assert_eq!(storage.delete_stale("events", &new).await.unwrap(), 1);

        let snapshot = storage.snapshot();
        assert_eq!(snapshot["events"].len(), 1);
        assert_eq!(snapshot["events"]["e2"], json!(22));
        assert_eq!(snapshot["venues"].len(), 1);
        assert_eq!(storage.import_of("events", "e2"), Some(new));
    }
}
