//! Service-adapter facade
//!
//! [`CtlManager`] is what the RPC boundary talks to. It owns the registry,
//! the orchestrator and the engine, decodes wire revisions and converts
//! engine topology snapshots into [`Topology`].

use crate::error::Result;
use crate::metrics;
use crate::orchestrator::TopologyOrchestrator;
use crate::rebalance::{EngineTopology, TopologyEngine};
use crate::registry::TaskRegistry;
use crate::revision::Revision;
use crate::task::TaskList;
use crate::types::{NodeInfo, Topology, TopologyChange};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Control-plane entry point for one node
pub struct CtlManager {
    node_info: NodeInfo,
    engine: Arc<dyn TopologyEngine>,
    registry: Arc<TaskRegistry>,
    orchestrator: TopologyOrchestrator,
}

impl CtlManager {
    /// Create a manager with an empty task registry
    pub fn new(node_info: NodeInfo, engine: Arc<dyn TopologyEngine>) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let orchestrator = TopologyOrchestrator::new(Arc::clone(&registry), Arc::clone(&engine));
        Self {
            node_info,
            engine,
            registry,
            orchestrator,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn get_node_info(&self) -> NodeInfo {
        self.node_info.clone()
    }

    /// Task list, long-polling while `have_rev` is the current revision.
    ///
    /// An empty `have_rev` returns the current list immediately.
    pub async fn get_task_list(
        &self,
        have_rev: &[u8],
        cancel: &CancellationToken,
    ) -> Result<TaskList> {
        if have_rev.is_empty() {
            return Ok(self.registry.task_list());
        }

        let have = Revision::decode(have_rev)?;
        debug!("Waiting for task list change from revision {}", have);
        self.registry.wait_task_list(have, cancel).await
    }

    /// Cancel a task, optionally only if it is still at revision `rev`
    pub fn cancel_task(&self, id: &str, rev: Option<&[u8]>) -> Result<()> {
        let expected = match rev {
            Some(rev) if !rev.is_empty() => Some(Revision::decode(rev)?),
            _ => None,
        };

        info!("Cancel task {} (expected revision: {:?})", id, expected);
        match self.registry.cancel_task(id, expected) {
            Ok(()) => {
                metrics::record_topology_change_event("canceled");
                Ok(())
            }
            Err(e) => {
                warn!("Cancel task {} failed: {}", id, e);
                Err(e)
            }
        }
    }

    /// Current topology, long-polling while `have_rev` is the engine's
    /// current revision
    pub async fn get_current_topology(
        &self,
        have_rev: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Topology> {
        let have = String::from_utf8_lossy(have_rev);
        let snapshot = self.engine.wait_get_topology(&have, cancel).await?;
        Ok(to_topology(snapshot))
    }

    pub fn prepare_topology_change(&self, change: &TopologyChange) -> Result<()> {
        info!("Prepare topology change {} ({:?})", change.id, change.change_type);
        self.orchestrator.prepare(change).inspect_err(|e| {
            warn!("Prepare topology change {} failed: {}", change.id, e);
        })
    }

    pub fn start_topology_change(&self, change: &TopologyChange) -> Result<()> {
        info!("Start topology change {} ({:?})", change.id, change.change_type);
        self.orchestrator.start(change).inspect_err(|e| {
            warn!("Start topology change {} failed: {}", change.id, e);
        })
    }

    /// Terminate the process immediately
    pub fn shutdown(&self) -> ! {
        info!("Shutdown requested, exiting");
        std::process::exit(0)
    }
}

/// Convert an engine snapshot for the orchestrator
pub fn to_topology(snapshot: EngineTopology) -> Topology {
    let is_balanced = snapshot.prev_warnings.is_empty() && snapshot.prev_errors.is_empty();

    let mut messages = Vec::new();
    for (resource, warnings) in &snapshot.prev_warnings {
        for warning in warnings {
            messages.push(format!("warning: resource: {:?} -- {}", resource, warning));
        }
    }
    for err in &snapshot.prev_errors {
        messages.push(format!("error: {}", err));
    }

    Topology {
        rev: snapshot.rev.into_bytes(),
        nodes: snapshot.member_nodes.into_iter().map(|n| n.uuid).collect(),
        is_balanced,
        messages,
    }
}
