//! Extension trait for Scheduler.

use std::sync::Arc;

use syncflow::Scheduler;

use crate::server::{run_server, AdminState};

/// Extension trait that adds the admin API to a shared scheduler.
pub trait SchedulerAdminExt: Sized {
    /// Serve the admin API on the given port.
    ///
    /// This spawns an HTTP server in the background; it must be called from
    /// within a tokio runtime.
    fn serve_admin(self, port: u16) -> Self;
}

impl SchedulerAdminExt for Arc<Scheduler> {
    fn serve_admin(self, port: u16) -> Self {
        let state = Arc::new(AdminState {
            scheduler: self.clone(),
        });

        tokio::spawn(async move {
            run_server(state, port).await;
        });

        self
    }
}
