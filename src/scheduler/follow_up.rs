use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::task::Task;

/// Arranges another tick after a slice ended with `Continue`.
///
/// Hosts driven by an external trigger typically fire an HTTP request to
/// their own tick endpoint here; in-process hosts wake their [`TickLoop`](crate::TickLoop).
#[async_trait]
pub trait FollowUp: Send + Sync {
    async fn arrange(&self, task: &Task) -> anyhow::Result<()>;
}

/// Leaves the next slice to the regular trigger.
#[derive(Debug, Clone, Default)]
pub struct NoFollowUp;

#[async_trait]
impl FollowUp for NoFollowUp {
    async fn arrange(&self, _task: &Task) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Wakes a [`Notify`]. Pair with [`TickLoop::wake_on`](crate::TickLoop::wake_on).
#[derive(Debug, Clone, Default)]
pub struct NotifyFollowUp {
    notify: Arc<Notify>,
}

impl NotifyFollowUp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

#[async_trait]
impl FollowUp for NotifyFollowUp {
    async fn arrange(&self, _task: &Task) -> anyhow::Result<()> {
        self.notify.notify_one();
        Ok(())
    }
}
