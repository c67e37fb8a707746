//! Built-in import steps.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::remote::{ApiClient, Filters};
use crate::step::{Step, StepContext, StepError, StepProgress};
use crate::storage::EntityStorage;

/// Pages through one entity type of the remote API and upserts every record.
///
/// The cursor is the API cursor of the next page to fetch.
pub struct FetchEntities {
    name: String,
    entity_type: String,
    filters: Filters,
    client: Arc<dyn ApiClient>,
    storage: Arc<dyn EntityStorage>,
}

impl FetchEntities {
    /// Step named `fetch-<entity_type>`.
    pub fn new(
        entity_type: impl Into<String>,
        client: Arc<dyn ApiClient>,
        storage: Arc<dyn EntityStorage>,
    ) -> Self {
        let entity_type = entity_type.into();
        Self {
            name: format!("fetch-{}", entity_type),
            entity_type,
            filters: Filters::new(),
            client,
            storage,
        }
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }
}

#[async_trait]
impl Step for FetchEntities {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        cursor: Option<&str>,
    ) -> Result<StepProgress, StepError> {
        let page = self
            .client
            .fetch_page(&self.entity_type, cursor, &self.filters)
            .await?;

        self.storage
            .upsert(&self.entity_type, &ctx.import_id, &page.records)
            .await
            .map_err(StepError::Fatal)?;

        debug!(
            entity_type = %self.entity_type,
            cursor = cursor.unwrap_or("start"),
            records = page.records.len(),
            "Fetched page"
        );

        Ok(match page.next_cursor {
            Some(next) => StepProgress::More(next),
            None => StepProgress::Complete,
        })
    }
}

/// Deletes entities the current import did not touch, one entity type per
/// cursor position.
pub struct ReconcileDeletions {
    entity_types: Vec<String>,
    storage: Arc<dyn EntityStorage>,
}

impl ReconcileDeletions {
    pub fn new<I, S>(entity_types: I, storage: Arc<dyn EntityStorage>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: entity_types.into_iter().map(Into::into).collect(),
            storage,
        }
    }
}

#[async_trait]
impl Step for ReconcileDeletions {
    fn name(&self) -> &str {
        "reconcile-deletions"
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        cursor: Option<&str>,
    ) -> Result<StepProgress, StepError> {
        let index = match cursor {
            None => 0,
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                StepError::fatal(anyhow::anyhow!("bad reconcile cursor {:?}", raw))
            })?,
        };
        let Some(entity_type) = self.entity_types.get(index) else {
            return Ok(StepProgress::Complete);
        };

        let deleted = self
            .storage
            .delete_stale(entity_type, &ctx.import_id)
            .await
            .map_err(StepError::Fatal)?;
        info!(
            entity_type = %entity_type,
            import_id = %ctx.import_id,
            deleted,
            "Reconciled deletions"
        );

        let next = index + 1;
        Ok(if next < self.entity_types.len() {
            StepProgress::More(next.to_string())
        } else {
            StepProgress::Complete
        })
    }
}
