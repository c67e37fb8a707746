//! Named single-holder advisory locks.
//!
//! A lock guards the critical section of one task type. Acquisition never
//! blocks: a caller that loses the race gets `false` back and moves on.
//! Locks are cooperative, so every path that ends a run has to release them;
//! the [`Watchdog`](crate::Watchdog) reclaims the ones nobody released.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::store::StoreError;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLockManager;

/// Durable lock table.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Take the lock for `holder`.
    ///
    /// Succeeds when the lock is free or already held by the same holder.
    /// Two different holders can never both succeed.
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Release the lock regardless of who holds it.
    async fn release(&self, name: &str) -> Result<(), StoreError>;

    /// Release the lock only if `holder` owns it. Returns whether it was released.
    async fn release_owned(&self, name: &str, holder: &str) -> Result<bool, StoreError>;

    /// Current holder, if any.
    async fn holder(&self, name: &str) -> Result<Option<String>, StoreError>;

    async fn is_held(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.holder(name).await?.is_some())
    }
}

/// In-process lock table.
#[derive(Default)]
pub struct MemoryLockManager {
    locks: Mutex<HashMap<String, String>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.locks
            .lock()
            .map_err(|_| StoreError::Unavailable("lock table mutex poisoned".into()))
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        _at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut locks = self.locks()?;
        match locks.get(name) {
            Some(current) if current != holder => Ok(false),
            _ => {
                locks.insert(name.to_string(), holder.to_string());
                Ok(true)
            }
        }
    }

    async fn release(&self, name: &str) -> Result<(), StoreError> {
        self.locks()?.remove(name);
        Ok(())
    }

    async fn release_owned(&self, name: &str, holder: &str) -> Result<bool, StoreError> {
        let mut locks = self.locks()?;
        if locks.get(name).is_some_and(|current| current == holder) {
            locks.remove(name);
            return Ok(true);
        }
        Ok(false)
    }

    async fn holder(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.locks()?.get(name).cloned())
    }
}
