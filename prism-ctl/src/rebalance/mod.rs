//! Interface to the rebalance/topology engine
//!
//! The engine owns cluster membership and moves index partitions between
//! nodes. The control plane only starts, stops and observes it through
//! [`TopologyEngine`]. [`LocalEngine`] is an in-process implementation.

mod engine;

pub use engine::{LocalEngine, STOPPED_ERROR};

use crate::error::{CtlError, Result};
use crate::types::TopologyChangeType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How the engine should carry out a membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeMode {
    /// Move partitions onto the new membership
    #[serde(rename = "rebalance")]
    Rebalance,
    /// Drop the removed nodes without moving data
    #[serde(rename = "failover-hard")]
    FailoverHard,
}

impl ChangeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeMode::Rebalance => "rebalance",
            ChangeMode::FailoverHard => "failover-hard",
        }
    }
}

impl TryFrom<TopologyChangeType> for ChangeMode {
    type Error = CtlError;

    fn try_from(change_type: TopologyChangeType) -> Result<Self> {
        match change_type {
            TopologyChangeType::Rebalance => Ok(ChangeMode::Rebalance),
            TopologyChangeType::Failover => Ok(ChangeMode::FailoverHard),
            TopologyChangeType::Unsupported => Err(CtlError::NotSupported(
                "unrecognized topology change type".to_string(),
            )),
        }
    }
}

impl fmt::Display for ChangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A membership change as the engine understands it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeTopologyRequest {
    /// Topology revision the caller based the change on; empty to force
    pub rev: String,
    pub mode: ChangeMode,
    /// Node ids that make up the membership after the change
    pub member_node_ids: Vec<String>,
}

/// A cluster member as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineNode {
    pub uuid: String,
}

impl EngineNode {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self { uuid: uuid.into() }
    }
}

/// Snapshot of the engine's current topology
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTopology {
    /// Opaque topology revision
    pub rev: String,
    pub member_nodes: Vec<EngineNode>,
    /// Warnings from the previous change, keyed by resource name
    pub prev_warnings: BTreeMap<String, Vec<String>>,
    /// Errors from the previous change
    pub prev_errors: Vec<String>,
}

/// Sequence positions of one (index partition, source partition, node) move
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// Sequence number when the move started
    pub init_seq: u64,
    /// Sequence number reached so far
    pub curr_seq: u64,
    /// Sequence number the move must reach
    pub want_seq: u64,
}

impl ProgressEntry {
    pub fn new(init_seq: u64, curr_seq: u64, want_seq: u64) -> Self {
        Self {
            init_seq,
            curr_seq,
            want_seq,
        }
    }

    /// Work done so far
    pub fn achieved(&self) -> u64 {
        self.curr_seq.saturating_sub(self.init_seq)
    }

    /// Total work of the move
    pub fn expected(&self) -> u64 {
        self.want_seq.saturating_sub(self.init_seq)
    }
}

/// index partition -> source partition -> node -> entry
pub type ProgressMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, ProgressEntry>>>;

/// Called by the engine while a change runs.
///
/// `Some(progress)` means the change is still running; `None` is the
/// termination signal. The returned string is only for the engine's own
/// logging.
pub type ProgressCallback = Arc<dyn Fn(Option<&ProgressMap>, &[String]) -> String + Send + Sync>;

/// Identifies one running change inside the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle(pub String);

impl fmt::Display for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The rebalance/topology engine consumed by the control plane.
///
/// `change_topology` and `stop_change_topology` are called with the task
/// registry locked. They must return promptly, run the actual work on the
/// engine's own tasks, and never invoke the progress callback from inside
/// the call. Stopping a run that is already terminating must be harmless.
#[async_trait]
pub trait TopologyEngine: Send + Sync {
    /// Current topology, without blocking
    fn get_topology(&self) -> EngineTopology;

    /// Long-poll for a topology whose revision differs from `have_rev`.
    /// An empty `have_rev` returns the current topology immediately.
    async fn wait_get_topology(
        &self,
        have_rev: &str,
        cancel: &CancellationToken,
    ) -> Result<EngineTopology>;

    /// Begin a membership change, reporting through `on_progress`
    fn change_topology(
        &self,
        request: ChangeTopologyRequest,
        on_progress: ProgressCallback,
    ) -> Result<RunHandle>;

    /// Ask a running change to stop
    fn stop_change_topology(&self, run: &RunHandle);

    /// Render a progress map for logs
    fn progress_table(&self, progress: &ProgressMap) -> String {
        crate::progress::format_table(progress)
    }
}
