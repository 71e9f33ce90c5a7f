//! Topology-change state machine
//!
//! ```text
//! absent ──prepare──▶ prepared ──start──▶ running ──engine done──▶ failed
//!    ▲                    │                  │
//!    └──────cancel────────┴──────────────────┘
//! ```
//!
//! At most one Prepared or Rebalance task exists at a time, including
//! finished ones: callers cancel a finished change before preparing the next.

use crate::error::{CtlError, Result};
use crate::metrics;
use crate::progress;
use crate::rebalance::{
    ChangeMode, ChangeTopologyRequest, ProgressCallback, ProgressMap, TopologyEngine,
};
use crate::registry::TaskRegistry;
use crate::revision::Revision;
use crate::task::{prepare_task_id, rebalance_task_id, Task, TaskHandle, TaskStatus, TaskType};
use crate::types::TopologyChange;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Marker returned to the engine when it reports termination
pub const DONE_MARKER: &str = "DONE";

/// Key of the originating change in a task's `extra` payload
pub const TOPOLOGY_CHANGE_KEY: &str = "topologyChange";

/// Drives prepare/start of topology changes on top of a [`TopologyEngine`]
pub struct TopologyOrchestrator {
    registry: Arc<TaskRegistry>,
    engine: Arc<dyn TopologyEngine>,
}

impl TopologyOrchestrator {
    pub fn new(registry: Arc<TaskRegistry>, engine: Arc<dyn TopologyEngine>) -> Self {
        Self { registry, engine }
    }

    /// Record a prepared topology change.
    ///
    /// Fails with `Conflict` on a stale topology revision or when any
    /// Prepared or Rebalance task already exists.
    pub fn prepare(&self, change: &TopologyChange) -> Result<()> {
        self.check_topology_rev(change)?;
        let extra = change_extra(change)?;
        let task_id = prepare_task_id(&change.id);

        self.registry.update_tasks(|tasks| {
            if let Some(existing) = tasks
                .tasks()
                .find(|t| matches!(t.task_type, TaskType::Prepared | TaskType::Rebalance))
            {
                return Err(CtlError::Conflict(format!(
                    "topology change task {} already exists",
                    existing.id
                )));
            }

            let rev = tasks.allocate(Revision::ZERO);
            tasks.push(TaskHandle::new(
                Task {
                    rev,
                    id: task_id.clone(),
                    task_type: TaskType::Prepared,
                    status: TaskStatus::Running,
                    is_cancelable: true,
                    // A prepared change is complete at its own stage
                    progress: 1.0,
                    detailed_progress: None,
                    description: "prepare topology change".to_string(),
                    error_message: String::new(),
                    extra,
                },
                None,
            ));
            Ok(())
        })?;

        metrics::record_topology_change_event("prepared");
        info!("Prepared topology change {}", change.id);
        Ok(())
    }

    /// Promote the prepared change with the same id to a running rebalance.
    ///
    /// Fails with `Conflict` on a stale topology revision or when a Rebalance
    /// task already exists, `NotFound` when the change was not prepared and
    /// `NotSupported` for an unrecognized change type. Engine errors are
    /// returned as-is and leave the Prepared task in place.
    pub fn start(&self, change: &TopologyChange) -> Result<()> {
        self.check_topology_rev(change)?;

        let extra = change_extra(change)?;
        let prepare_id = prepare_task_id(&change.id);
        let task_id = rebalance_task_id(&change.id);
        let on_progress = self.progress_callback(&task_id);

        let mode = self.registry.update_tasks(|tasks| {
            if let Some(existing) = tasks.tasks().find(|t| t.task_type == TaskType::Rebalance) {
                return Err(CtlError::Conflict(format!(
                    "rebalance task {} already exists",
                    existing.id
                )));
            }

            let index = tasks
                .position(&prepare_id)
                .ok_or_else(|| CtlError::NotFound(format!("no prepared task {}", prepare_id)))?;

            let mode = ChangeMode::try_from(change.change_type)?;
            let request = ChangeTopologyRequest {
                rev: String::from_utf8_lossy(&change.current_topology_rev).into_owned(),
                mode,
                member_node_ids: change.keep_node_ids(),
            };
            let run = self.engine.change_topology(request, on_progress)?;
            debug!("Engine accepted topology change {} as run {}", change.id, run);

            let engine = Arc::clone(&self.engine);
            let rev = tasks.allocate(tasks.list_revision());
            tasks.replace(
                index,
                TaskHandle::new(
                    Task {
                        rev,
                        id: task_id.clone(),
                        task_type: TaskType::Rebalance,
                        status: TaskStatus::Running,
                        is_cancelable: true,
                        progress: 0.0,
                        detailed_progress: Some(BTreeMap::new()),
                        description: "topology change".to_string(),
                        error_message: String::new(),
                        extra,
                    },
                    Some(Box::new(move || engine.stop_change_topology(&run))),
                ),
            );
            Ok(mode)
        })?;

        metrics::record_topology_change_event("started");
        info!("Started topology change {} (mode: {})", change.id, mode);
        Ok(())
    }

    /// Reject a change pinned to a topology revision other than the
    /// engine's current one. An empty revision forces the change.
    fn check_topology_rev(&self, change: &TopologyChange) -> Result<()> {
        if change.current_topology_rev.is_empty() {
            return Ok(());
        }

        let current = self.engine.get_topology().rev;
        if change.current_topology_rev != current.as_bytes() {
            warn!(
                "Topology change {} based on revision {}, current is {}",
                change.id,
                String::from_utf8_lossy(&change.current_topology_rev),
                current
            );
            return Err(CtlError::Conflict(format!(
                "topology revision {} is stale, current is {}",
                String::from_utf8_lossy(&change.current_topology_rev),
                current
            )));
        }
        Ok(())
    }

    /// Build the callback the engine reports through.
    ///
    /// It holds only weak references: the registry owns the run's cancel
    /// resource, which holds the engine, which holds this callback.
    fn progress_callback(&self, task_id: &str) -> ProgressCallback {
        let registry: Weak<TaskRegistry> = Arc::downgrade(&self.registry);
        let engine: Weak<dyn TopologyEngine> = Arc::downgrade(&self.engine);
        let task_id = task_id.to_string();

        Arc::new(move |progress: Option<&ProgressMap>, errors: &[String]| -> String {
            if let Some(registry) = registry.upgrade() {
                progress::apply_progress(&registry, &task_id, progress, errors);
            }

            match progress::running_progress(progress) {
                None => DONE_MARKER.to_string(),
                Some(progress) => engine
                    .upgrade()
                    .map(|engine| engine.progress_table(progress))
                    .unwrap_or_default(),
            }
        })
    }
}

fn change_extra(change: &TopologyChange) -> Result<HashMap<String, serde_json::Value>> {
    let value = serde_json::to_value(change)?;
    Ok(HashMap::from([(TOPOLOGY_CHANGE_KEY.to_string(), value)]))
}
