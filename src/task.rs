//! Task records and the task lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// The string stored as lock holder while this task owns its type's lock.
    pub fn lock_holder(&self) -> String {
        format!("task:{}", self.0)
    }

    /// Inverse of [`lock_holder`](Self::lock_holder).
    pub fn from_lock_holder(holder: &str) -> Option<Self> {
        holder.strip_prefix("task:")?.parse().ok().map(Self)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier shared by every task row belonging to one logical run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// Queued ──► Running ──► Finished
///    │          │ ▲
///    │          ▼ │
///    │        Paused
///    │          │
///    └──────────┴──────► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Requested, waiting for a tick to claim it.
    Queued,
    /// Claimed by an invocation that is executing the job.
    Running,
    /// Between slices: progress is checkpointed and the lock is still held.
    Paused,
    /// Terminated by failure, cancellation or the watchdog.
    Stopped,
    /// Completed successfully.
    Finished,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Stopped,
        TaskStatus::Finished,
    ];

    /// Statuses that count against the one-task-per-type slot.
    pub const PENDING: [TaskStatus; 3] =
        [TaskStatus::Queued, TaskStatus::Running, TaskStatus::Paused];

    /// Statuses that own the lock.
    pub const ACTIVE: [TaskStatus; 2] = [TaskStatus::Running, TaskStatus::Paused];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Finished)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Whether a task in this state may be moved to `next`.
    ///
    /// Non-terminal states may be rewritten to themselves to update the message.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (*self, next) {
            (Stopped | Finished, _) => false,
            (a, b) if a == b => true,
            (Queued, Running | Stopped) => true,
            (Running, Paused | Finished | Stopped) => true,
            (Paused, Running | Stopped) => true,
            _ => false,
        }
    }

    /// Every status from which `next` is reachable in one step.
    pub fn predecessors(next: TaskStatus) -> Vec<TaskStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "finished" => Ok(Self::Finished),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Scheduling priority of a requested run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Runs when the regular interval allows.
    #[default]
    Normal,
    /// Runs on the next tick, ignoring the interval.
    Immediate,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Immediate => "immediate",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "immediate" => Ok(Self::Immediate),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Opaque progress snapshot owned by the job that wrote it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(serde_json::Value);

impl Checkpoint {
    /// A checkpoint with no progress recorded.
    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// A task retrieved from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub checkpoint: Checkpoint,
    pub run_id: RunId,
}

impl Task {
    pub fn lock_holder(&self) -> String {
        self.id.lock_holder()
    }
}

/// Parameters for a task about to be created.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub priority: Priority,
    pub run_id: RunId,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, run_id: RunId, created_at: DateTime<Utc>) -> Self {
        Self {
            task_type: task_type.into(),
            priority: Priority::Normal,
            run_id,
            message: None,
            created_at,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub(crate) fn into_task(self, id: TaskId) -> Task {
        Task {
            id,
            task_type: self.task_type,
            status: TaskStatus::Queued,
            priority: self.priority,
            message: self.message,
            created_at: self.created_at,
            modified_at: self.created_at,
            checkpoint: Checkpoint::empty(),
            run_id: self.run_id,
        }
    }
}

/// Selection criteria for listing tasks. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub statuses: Vec<TaskStatus>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub id: Option<TaskId>,
    #[serde(default)]
    pub run_id: Option<RunId>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn statuses(mut self, statuses: &[TaskStatus]) -> Self {
        self.statuses.extend_from_slice(statuses);
        self
    }

    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&task.status))
            && self.task_type.as_deref().map_or(true, |t| t == task.task_type)
            && self.id.map_or(true, |id| id == task.id)
            && self.run_id.as_ref().map_or(true, |r| *r == task.run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for next in TaskStatus::ALL {
            assert!(!TaskStatus::Stopped.can_transition_to(next));
            assert!(!TaskStatus::Finished.can_transition_to(next));
        }
    }

    #[test]
    fn lifecycle_edges() {
        use TaskStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Stopped));
        assert!(!Queued.can_transition_to(Paused));
        assert!(!Queued.can_transition_to(Finished));
        assert!(Running.can_transition_to(Paused));
        assert!(Running.can_transition_to(Finished));
        assert!(Paused.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Finished));
        assert!(!Running.can_transition_to(Queued));
        assert!(Running.can_transition_to(Running));
    }

    #[test]
    fn predecessors_of_stopped_are_pending_states() {
        let preds = TaskStatus::predecessors(TaskStatus::Stopped);
        assert_eq!(preds, TaskStatus::PENDING.to_vec());
    }

    #[test]
    fn status_parses_from_its_name() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn lock_holder_names_the_task() {
        let id = TaskId(42);
        assert_eq!(id.lock_holder(), "task:42");
        assert_eq!(TaskId::from_lock_holder("task:42"), Some(id));
        assert_eq!(TaskId::from_lock_holder("worker-3"), None);
        assert_eq!(TaskId::from_lock_holder("task:x"), None);
    }

    #[test]
    fn empty_checkpoint_detection() {
        assert!(Checkpoint::empty().is_empty());
        assert!(Checkpoint::from_value(serde_json::json!({})).is_empty());
        assert!(!Checkpoint::from_value(serde_json::json!({"step": 1})).is_empty());
    }

    #[test]
    fn filter_matches_on_every_field() {
        let now = Utc::now();
        let task = NewTask::new("import", RunId::new("r1"), now).into_task(TaskId(7));

        assert!(TaskFilter::new().matches(&task));
        assert!(TaskFilter::new()
            .statuses(&TaskStatus::PENDING)
            .task_type("import")
            .matches(&task));
        assert!(!TaskFilter::new().status(TaskStatus::Running).matches(&task));
        assert!(!TaskFilter::new().task_type("export").matches(&task));
        assert!(!TaskFilter::new().id(TaskId(8)).matches(&task));
        assert!(!TaskFilter::new().run_id(RunId::new("r2")).matches(&task));
    }
}
