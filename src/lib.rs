//! # Syncflow
//!
//! Resumable imports under short, stateless invocations.
//!
//! Syncflow runs a long, multi-stage import from a paginated remote API as a
//! sequence of short slices. Each slice is started by a [`Scheduler::tick`],
//! which may be called from a cron hook, an HTTP endpoint or the bundled
//! [`TickLoop`], as often and as concurrently as the host likes.
//!
//! ## Guarantees
//!
//! - **One run per type** - a task status compare-and-set plus a per-type lock
//!   keep at most one task of a type `Running` or `Paused`
//! - **No lost progress** - every slice checkpoints where it stopped, down to
//!   the page cursor
//! - **No stuck runs** - the [`Watchdog`] stops tasks that stopped reporting
//!   and frees the locks they held
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use syncflow::{FetchEntities, Pipeline, Priority, ReconcileDeletions, Scheduler, SyncContext};
//!
//! let pipeline = Pipeline::new("import")
//!     .step(FetchEntities::new("venues", client.clone(), storage.clone()))
//!     .step(FetchEntities::new("events", client.clone(), storage.clone()))
//!     .step(ReconcileDeletions::new(["venues", "events"], storage.clone()))
//!     .with_budget(Duration::from_secs(25));
//!
//! let scheduler = Scheduler::builder(SyncContext::sqlite(pool).await?)
//!     .job(pipeline)
//!     .build();
//!
//! // From the trigger:
//! scheduler.request_run("import", Priority::Normal).await?;
//! let report = scheduler.tick().await?;
//! ```
//!
//! ## Admin API
//!
//! Use `syncflow-harness` to expose task introspection over HTTP:
//!
//! ```rust,ignore
//! use syncflow_harness::SchedulerAdminExt;
//!
//! let scheduler = Arc::new(scheduler).serve_admin(3000);
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - Enable SQLite-backed task, lock, advisory and history storage

pub mod advisory;
pub mod clock;
pub mod config;
pub mod context;
pub mod job;
pub mod lock;
pub mod pipeline;
pub mod recorder;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod step;
pub mod storage;
pub mod store;
pub mod task;
pub mod watchdog;

pub use advisory::{Advisory, AdvisoryKind, AdvisoryStore, MemoryAdvisoryStore};
pub use clock::{Clock, IdGenerator, ManualClock, SequentialRunIds, SystemClock, UuidRunIds};
pub use config::{ConfigError, PipelineConfig, SchedulerConfig, SyncConfig};
pub use context::SyncContext;
pub use job::{Job, PipelineResult, RunContext};
pub use lock::{LockManager, MemoryLockManager};
pub use pipeline::{FetchEntities, ImportState, Pipeline, PipelineError, ReconcileDeletions};
pub use recorder::{NoopRecorder, Recorder, SliceId, SliceStatus, StepId, StepStatus};
pub use remote::{ApiClient, FetchError, Filters, Page, Record};
pub use retry::RetryPolicy;
pub use scheduler::{
    FollowUp, NoFollowUp, NotifyFollowUp, Scheduler, SchedulerBuilder, SchedulerError,
    TickLoop, TickOutcome, TickReport,
};
pub use step::{Step, StepContext, StepError, StepProgress};
pub use storage::{EntityStorage, MemoryEntityStorage};
pub use store::{MemoryTaskStore, StoreError, TaskStore};
pub use task::{Checkpoint, NewTask, Priority, RunId, Task, TaskFilter, TaskId, TaskStatus};
pub use watchdog::Watchdog;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use advisory::SqliteAdvisoryStore;
#[cfg(feature = "sqlite")]
pub use lock::SqliteLockManager;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRecorder;
#[cfg(feature = "sqlite")]
pub use store::SqliteTaskStore;
