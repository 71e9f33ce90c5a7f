//! In-memory registry of topology-change tasks
//!
//! All registry state (task handles, the task-list revision, the revision
//! allocator and the change signal) sits behind one exclusive lock. The lock
//! is never held across an await: long-poll callers subscribe to the change
//! signal under the lock, release it, wait, and re-check.

use crate::error::{CtlError, Result};
use crate::metrics;
use crate::notify::ChangeSignal;
use crate::revision::{Revision, RevisionAllocator};
use crate::task::{Task, TaskHandle, TaskList};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug)]
struct RegistryState {
    revisions: RevisionAllocator,
    rev: Revision,
    handles: Vec<TaskHandle>,
    signal: ChangeSignal,
}

impl RegistryState {
    fn snapshot(&self) -> TaskList {
        TaskList {
            rev: self.rev,
            tasks: self.handles.iter().map(|h| (**h.task()).clone()).collect(),
        }
    }

    /// Bump the task-list revision and wake waiters. The mutation being
    /// announced must already be applied.
    fn commit(&mut self) {
        self.rev = self.revisions.allocate(self.rev);
        self.signal.fire();
        metrics::update_task_list_metrics(self.rev, self.handles.len());
    }
}

/// Mutable view of the task list handed to [`TaskRegistry::update_tasks`].
///
/// Every mutating method marks the set dirty; the registry revision is
/// bumped only if the mutator left it dirty and returned `Ok`.
pub struct TaskSet<'a> {
    handles: &'a mut Vec<TaskHandle>,
    revisions: &'a mut RevisionAllocator,
    list_rev: Revision,
    dirty: bool,
}

impl TaskSet<'_> {
    /// Current task-list revision
    pub fn list_revision(&self) -> Revision {
        self.list_rev
    }

    /// Allocate a revision for a new or updated task
    pub fn allocate(&mut self, prev: Revision) -> Revision {
        self.revisions.allocate(prev)
    }

    /// Iterate over current task snapshots in order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.handles.iter().map(|h| h.task().as_ref())
    }

    /// Find a task snapshot by id
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks().find(|t| t.id == id)
    }

    /// Position of a task in the list
    pub fn position(&self, id: &str) -> Option<usize> {
        self.handles.iter().position(|h| h.task().id == id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Append a task
    pub fn push(&mut self, handle: TaskHandle) {
        self.handles.push(handle);
        self.dirty = true;
    }

    /// Replace the handle at `index` with a new one
    pub fn replace(&mut self, index: usize, handle: TaskHandle) -> TaskHandle {
        self.dirty = true;
        std::mem::replace(&mut self.handles[index], handle)
    }

    /// Replace the snapshot of the task with the given id, keeping its
    /// handle. Returns `false` if no such task exists.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&Task) -> Task) -> bool {
        match self.handles.iter_mut().find(|h| h.task().id == id) {
            Some(handle) => {
                let next = f(handle.task());
                handle.replace_task(next);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Remove the handle at `index`
    pub fn remove(&mut self, index: usize) -> TaskHandle {
        self.dirty = true;
        self.handles.remove(index)
    }
}

/// The single source of truth for what operations are happening
#[derive(Debug)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    /// Create an empty registry at revision zero
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                revisions: RevisionAllocator::new(),
                rev: Revision::ZERO,
                handles: Vec::new(),
                signal: ChangeSignal::new(),
            }),
        }
    }

    /// Current task-list revision
    pub fn revision(&self) -> Revision {
        self.state.lock().rev
    }

    /// Snapshot of the current task list, without blocking
    pub fn task_list(&self) -> TaskList {
        self.state.lock().snapshot()
    }

    /// Snapshot of a single task
    pub fn task(&self, id: &str) -> Option<Task> {
        self.state
            .lock()
            .handles
            .iter()
            .find(|h| h.task().id == id)
            .map(|h| (**h.task()).clone())
    }

    /// Long-poll for a task list whose revision differs from `have`.
    ///
    /// Returns immediately if the registry has already moved past `have`.
    /// Otherwise waits until a mutation commits or `cancel` fires, in which
    /// case `CtlError::Canceled` is returned and no snapshot is produced.
    pub async fn wait_task_list(&self, have: Revision, cancel: &CancellationToken) -> Result<TaskList> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if state.rev != have {
                    return Ok(state.snapshot());
                }
                state.signal.subscribe()
            };

            metrics::record_long_poll_wait("task_list");
            if let Err(err) = waiter.fired_or_canceled(cancel).await {
                debug!("Task list wait canceled, have_rev: {}", have);
                metrics::record_long_poll_canceled("task_list");
                return Err(err);
            }
        }
    }

    /// Cancel a task and remove it from the registry.
    ///
    /// Fails with `Conflict` if `expected` is given and differs from the
    /// task's revision, `NotSupported` if the task is not cancelable and
    /// `NotFound` if no task has this id. A failed cancel leaves the
    /// registry untouched.
    pub fn cancel_task(&self, id: &str, expected: Option<Revision>) -> Result<()> {
        let mut state = self.state.lock();

        let index = state
            .handles
            .iter()
            .position(|h| h.task().id == id)
            .ok_or_else(|| CtlError::NotFound(format!("task {}", id)))?;

        let task = state.handles[index].task();
        if let Some(expected) = expected {
            if expected != task.rev {
                return Err(CtlError::Conflict(format!(
                    "task {} is at revision {}, not {}",
                    id, task.rev, expected
                )));
            }
        }
        if !task.is_cancelable {
            return Err(CtlError::NotSupported(format!("task {} is not cancelable", id)));
        }

        let handle = state.handles.remove(index);
        info!("Canceling task {} after {:?}", id, handle.age());
        handle.cancel();

        state.commit();
        Ok(())
    }

    /// Apply `mutator` to the task list under the lock.
    ///
    /// If the mutator changes the list and returns `Ok`, a new task-list
    /// revision is allocated and waiters are released before the lock is
    /// dropped. Mutators must validate before they mutate: an `Err` return
    /// does not roll back changes already made.
    pub fn update_tasks<R>(&self, mutator: impl FnOnce(&mut TaskSet<'_>) -> Result<R>) -> Result<R> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut set = TaskSet {
            handles: &mut state.handles,
            revisions: &mut state.revisions,
            list_rev: state.rev,
            dirty: false,
        };
        let result = mutator(&mut set)?;
        let dirty = set.dirty;

        if dirty {
            state.commit();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskStatus, TaskType};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn make_task(id: &str, rev: Revision, cancelable: bool) -> Task {
        Task {
            rev,
            id: id.to_string(),
            task_type: TaskType::Prepared,
            status: TaskStatus::Running,
            is_cancelable: cancelable,
            progress: 1.0,
            detailed_progress: None,
            description: "test task".to_string(),
            error_message: String::new(),
            extra: HashMap::new(),
        }
    }

    fn add_task(registry: &TaskRegistry, id: &str, cancelable: bool) -> Revision {
        registry
            .update_tasks(|tasks| {
                let rev = tasks.allocate(Revision::ZERO);
                tasks.push(TaskHandle::new(make_task(id, rev, cancelable), None));
                Ok(rev)
            })
            .unwrap()
    }

    #[test]
    fn test_new_registry() {
        let registry = TaskRegistry::new();
        let list = registry.task_list();
        assert_eq!(list.rev, Revision::ZERO);
        assert!(list.tasks.is_empty());
    }

    #[test]
    fn test_update_bumps_revision() {
        let registry = TaskRegistry::new();
        let task_rev = add_task(&registry, "prepare:a", true);

        let list = registry.task_list();
        assert_eq!(task_rev, Revision::new(1));
        assert_eq!(list.rev, Revision::new(2));
        assert_eq!(list.tasks.len(), 1);
    }

    #[test]
    fn test_clean_update_keeps_revision() {
        let registry = TaskRegistry::new();
        add_task(&registry, "prepare:a", true);
        let before = registry.revision();

        let found = registry
            .update_tasks(|tasks| Ok(tasks.update("missing", |t| t.clone())))
            .unwrap();
        assert!(!found);
        assert_eq!(registry.revision(), before);
    }

    #[test]
    fn test_failed_update_keeps_revision() {
        let registry = TaskRegistry::new();
        let before = registry.revision();
        let result: Result<()> =
            registry.update_tasks(|_| Err(CtlError::Conflict("nope".to_string())));
        assert!(result.is_err());
        assert_eq!(registry.revision(), before);
    }

    #[test]
    fn test_cancel_task() {
        let registry = TaskRegistry::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        registry
            .update_tasks(|tasks| {
                let rev = tasks.allocate(Revision::ZERO);
                tasks.push(TaskHandle::new(
                    make_task("rebalance:a", rev, true),
                    Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
                ));
                Ok(())
            })
            .unwrap();
        let before = registry.revision();

        registry.cancel_task("rebalance:a", None).unwrap();

        assert!(stopped.load(Ordering::SeqCst));
        assert!(registry.task_list().tasks.is_empty());
        assert!(registry.revision() > before);
    }

    #[test]
    fn test_cancel_errors_leave_registry_unchanged() {
        let registry = TaskRegistry::new();
        let rev = add_task(&registry, "prepare:a", true);
        add_task(&registry, "fixed", false);
        let before = registry.task_list();

        assert!(matches!(
            registry.cancel_task("missing", None),
            Err(CtlError::NotFound(_))
        ));
        assert!(matches!(
            registry.cancel_task("prepare:a", Some(Revision::new(rev.number() + 100))),
            Err(CtlError::Conflict(_))
        ));
        assert!(matches!(
            registry.cancel_task("fixed", None),
            Err(CtlError::NotSupported(_))
        ));

        assert_eq!(registry.task_list(), before);

        registry.cancel_task("prepare:a", Some(rev)).unwrap();
        assert_eq!(registry.task_list().tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_on_stale_revision() {
        let registry = TaskRegistry::new();
        add_task(&registry, "prepare:a", true);

        let cancel = CancellationToken::new();
        let list = tokio::time::timeout(
            Duration::from_millis(100),
            registry.wait_task_list(Revision::ZERO, &cancel),
        )
        .await
        .expect("stale revision must not block")
        .unwrap();
        assert_eq!(list.rev, registry.revision());
    }

    #[tokio::test]
    async fn test_wait_blocks_until_update() {
        let registry = Arc::new(TaskRegistry::new());
        let have = registry.revision();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                registry.wait_task_list(have, &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        add_task(&registry, "prepare:a", true);

        let list = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake after update")
            .unwrap()
            .unwrap();
        assert_ne!(list.rev, have);
        assert_eq!(list.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_canceled() {
        let registry = Arc::new(TaskRegistry::new());
        let cancel = CancellationToken::new();

        let waiter = {
            let registry = Arc::clone(&registry);
            let cancel = cancel.clone();
            tokio::spawn(async move { registry.wait_task_list(Revision::ZERO, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(CtlError::Canceled));
    }
}
