//! Explicitly wired collaborators shared by the scheduler and the watchdog.

use std::sync::Arc;

use crate::advisory::{AdvisoryStore, MemoryAdvisoryStore};
use crate::clock::{Clock, IdGenerator, SystemClock, UuidRunIds};
use crate::lock::{LockManager, MemoryLockManager};
use crate::store::{MemoryTaskStore, TaskStore};

/// Handles to task storage, locks, advisories, time and run ids.
#[derive(Clone)]
pub struct SyncContext {
    pub tasks: Arc<dyn TaskStore>,
    pub locks: Arc<dyn LockManager>,
    pub advisories: Arc<dyn AdvisoryStore>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl SyncContext {
    /// Context over the given stores, on the system clock with uuid run ids.
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        locks: Arc<dyn LockManager>,
        advisories: Arc<dyn AdvisoryStore>,
    ) -> Self {
        Self {
            tasks,
            locks,
            advisories,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidRunIds),
        }
    }

    /// Everything in memory. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryTaskStore::new()),
            Arc::new(MemoryLockManager::new()),
            Arc::new(MemoryAdvisoryStore::new()),
        )
    }

    /// Stores backed by `pool`, with their tables created if missing.
    #[cfg(feature = "sqlite")]
    pub async fn sqlite(pool: sqlx::SqlitePool) -> Result<Self, crate::store::StoreError> {
        use crate::advisory::SqliteAdvisoryStore;
        use crate::lock::SqliteLockManager;
        use crate::store::SqliteTaskStore;

        let tasks = SqliteTaskStore::new(pool.clone());
        tasks.run_migrations().await?;
        let locks = SqliteLockManager::new(pool.clone());
        locks.run_migrations().await?;
        let advisories = SqliteAdvisoryStore::new(pool);
        advisories.run_migrations().await?;

        Ok(Self::new(
            Arc::new(tasks),
            Arc::new(locks),
            Arc::new(advisories),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}
