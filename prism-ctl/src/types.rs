//! Types exchanged with the cluster orchestrator across the service boundary
//!
//! Topology revisions are opaque byte strings here; task revisions travel as
//! decimal strings inside [`crate::task::TaskList`].

use serde::{Deserialize, Serialize};

/// Identity of this node as reported to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,

    /// Orchestrator-defined priority
    #[serde(default)]
    pub priority: i64,

    /// Free-form metadata passed through untouched
    #[serde(default)]
    pub opaque: serde_json::Value,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            priority: 0,
            opaque: serde_json::Value::Null,
        }
    }
}

/// Kind of membership change requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyChangeType {
    Rebalance,
    Failover,
    /// Any type this node does not know how to perform
    #[serde(other)]
    Unsupported,
}

/// How a kept node rejoins after a failover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryType {
    Full,
    Delta,
}

/// A node that remains a member after the change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepNode {
    pub node_info: NodeInfo,
    pub recovery_type: RecoveryType,
}

/// A requested topology change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyChange {
    /// Caller-chosen change id
    pub id: String,

    /// Topology revision the change was computed against. Empty means the
    /// caller forces the change without checking.
    #[serde(default)]
    pub current_topology_rev: Vec<u8>,

    #[serde(rename = "type")]
    pub change_type: TopologyChangeType,

    #[serde(default)]
    pub keep_nodes: Vec<KeepNode>,

    #[serde(default)]
    pub eject_nodes: Vec<NodeInfo>,
}

impl TopologyChange {
    /// A change keeping exactly `node_ids`, with full recovery
    pub fn new<S: Into<String>>(
        id: impl Into<String>,
        change_type: TopologyChangeType,
        node_ids: Vec<S>,
    ) -> Self {
        Self {
            id: id.into(),
            current_topology_rev: Vec::new(),
            change_type,
            keep_nodes: node_ids
                .into_iter()
                .map(|id| KeepNode {
                    node_info: NodeInfo::new(id),
                    recovery_type: RecoveryType::Full,
                })
                .collect(),
            eject_nodes: Vec::new(),
        }
    }

    /// Pin the change to a topology revision
    pub fn with_topology_rev(mut self, rev: impl Into<Vec<u8>>) -> Self {
        self.current_topology_rev = rev.into();
        self
    }

    /// Ids of the nodes kept by the change, in request order
    pub fn keep_node_ids(&self) -> Vec<String> {
        self.keep_nodes
            .iter()
            .map(|n| n.node_info.node_id.clone())
            .collect()
    }
}

/// Cluster topology as reported to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub rev: Vec<u8>,
    pub nodes: Vec<String>,
    pub is_balanced: bool,
    pub messages: Vec<String>,
}
