//! Tasks: observable long-running cluster operations
//!
//! A [`Task`] is an immutable snapshot. The registry replaces the whole
//! snapshot on every update (with a fresh revision) instead of editing
//! fields in place, so readers never see a half-applied update.

use crate::revision::Revision;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Prefix of the task tracking a prepared topology change
pub const PREPARE_TASK_PREFIX: &str = "prepare:";

/// Prefix of the task tracking a running topology change
pub const REBALANCE_TASK_PREFIX: &str = "rebalance:";

/// Id of the task that tracks the preparation of `change_id`
pub fn prepare_task_id(change_id: &str) -> String {
    format!("{}{}", PREPARE_TASK_PREFIX, change_id)
}

/// Id of the task that tracks the execution of `change_id`
pub fn rebalance_task_id(change_id: &str) -> String {
    format!("{}{}", REBALANCE_TASK_PREFIX, change_id)
}

/// Kind of operation a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// A topology change that has been prepared but not started
    Prepared,
    /// A topology change handed to the rebalance engine
    Rebalance,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Prepared => "prepared",
            TaskType::Rebalance => "rebalance",
        }
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Failed,
    /// Reserved for callers; the rebalance path reports every termination
    /// as `Failed`.
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Failed => "failed",
            TaskStatus::Done => "done",
        }
    }

    /// Whether the task has stopped making progress
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Snapshot of one tracked operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Revision of this snapshot
    pub rev: Revision,

    /// Stable identifier, e.g. `rebalance:<change id>`
    pub id: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    pub status: TaskStatus,

    pub is_cancelable: bool,

    /// Completion fraction in `[0, 1]`
    pub progress: f64,

    /// Completion fraction per node, when known
    #[serde(default)]
    pub detailed_progress: Option<BTreeMap<String, f64>>,

    pub description: String,

    /// Newline-joined errors reported so far; empty if none
    #[serde(default)]
    pub error_message: String,

    /// Opaque payload, e.g. the originating topology change
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Registry-wide revision plus the current task snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub rev: Revision,
    pub tasks: Vec<Task>,
}

impl TaskList {
    /// Find a task by id
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// Something that must be torn down when its task is canceled, such as a
/// live rebalance run.
///
/// `cancel` consumes the resource, so it runs at most once. It is called
/// with the registry lock held: it must return promptly and must not call
/// back into the registry.
pub trait CancelableResource: Send {
    fn cancel(self: Box<Self>);
}

impl<F> CancelableResource for F
where
    F: FnOnce() + Send,
{
    fn cancel(self: Box<Self>) {
        (*self)()
    }
}

/// The registry's wrapper around a task snapshot
pub struct TaskHandle {
    started_at: Instant,
    task: Arc<Task>,
    on_cancel: Option<Box<dyn CancelableResource>>,
}

impl TaskHandle {
    /// Wrap a new task
    pub fn new(task: Task, on_cancel: Option<Box<dyn CancelableResource>>) -> Self {
        Self {
            started_at: Instant::now(),
            task: Arc::new(task),
            on_cancel,
        }
    }

    /// Current snapshot
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// How long ago this handle (or the handle it replaced) was created
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_cancelable(&self) -> bool {
        self.task.is_cancelable
    }

    /// Replace the snapshot, keeping creation time and cancel resource
    pub fn replace_task(&mut self, task: Task) {
        self.task = Arc::new(task);
    }

    /// Run the cancel resource, if any. Consumes the handle.
    pub fn cancel(self) {
        if let Some(resource) = self.on_cancel {
            resource.cancel();
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("started_at", &self.started_at)
            .field("task", &self.task)
            .field("has_cancel", &self.on_cancel.is_some())
            .finish()
    }
}
