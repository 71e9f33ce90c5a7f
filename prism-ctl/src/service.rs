//! tarpc service definition for the control plane
//!
//! Mirrors the [`crate::manager::CtlManager`] operations. Revisions travel
//! as opaque byte strings; an empty revision means "don't wait" for the
//! long-poll calls.

use crate::error::CtlError;
use crate::task::TaskList;
use crate::types::{NodeInfo, Topology, TopologyChange};

/// Prism control-plane RPC service definition.
#[tarpc::service]
pub trait PrismCtl {
    /// Get node information
    async fn node_info() -> NodeInfo;

    // ========================================
    // Tasks
    // ========================================

    /// Get the task list, waiting while `have_rev` is current
    async fn task_list(have_rev: Vec<u8>) -> Result<TaskList, CtlError>;

    /// Cancel a task, optionally only at the expected revision
    async fn cancel_task(id: String, rev: Option<Vec<u8>>) -> Result<(), CtlError>;

    // ========================================
    // Topology
    // ========================================

    /// Get the cluster topology, waiting while `have_rev` is current
    async fn current_topology(have_rev: Vec<u8>) -> Result<Topology, CtlError>;

    async fn prepare_topology_change(change: TopologyChange) -> Result<(), CtlError>;

    async fn start_topology_change(change: TopologyChange) -> Result<(), CtlError>;

    /// Terminate the serving process
    async fn shutdown();
}
