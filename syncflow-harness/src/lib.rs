//! HTTP admin surface for Syncflow.
//!
//! Adds `.serve_admin(port)` to an `Arc<Scheduler>`, spawning a small JSON
//! API for inspecting and steering tasks. The same endpoints make a
//! convenient tick trigger for hosts that are woken over HTTP.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use syncflow::{Scheduler, SyncContext};
//! use syncflow_harness::SchedulerAdminExt;
//!
//! let scheduler = Arc::new(Scheduler::builder(ctx).job(pipeline).build())
//!     .serve_admin(3000);
//!
//! // curl -X POST http://localhost:3000/api/tick
//! ```
//!
//! # Endpoints
//!
//! - `GET /api/tasks?type=&status=&id=&run_id=` - list tasks
//! - `POST /api/tasks/:id/terminate[?cascade=true]` - stop a task (or its whole run)
//! - `DELETE /api/tasks?status=` - purge tasks in a status
//! - `POST /api/runs/:type[?immediate=true]` - request a run
//! - `POST /api/tick` - run one scheduling pass
//! - `GET /api/advisories` - open advisories
//! - `GET /api/jobs` - registered task types

mod ext;
mod server;

pub use ext::SchedulerAdminExt;
pub use server::{create_router, run_server, AdminState};
