//! Prism Ctl - Control-plane adapter for Prism cluster topology changes
//!
//! Tracks long-running cluster operations as revisioned tasks that an
//! external orchestrator can long-poll, and drives topology changes
//! through a rebalance engine.
//!
//! # Architecture
//!
//! - **Revision**: strictly increasing revisions shared by the task list and every task
//! - **Registry**: the task list behind one lock, with long-poll waits
//! - **Orchestrator**: prepare/start state machine for topology changes
//! - **Progress**: folds engine progress reports into task updates
//! - **Rebalance**: engine interface plus an in-process engine
//! - **Manager**: service-adapter facade over the pieces above
//! - **Service/Server/Client**: tarpc over length-delimited JSON on TCP
//!
//! # Key Operations
//!
//! - Tasks: get task list (optionally waiting), cancel task
//! - Topology: get current topology (optionally waiting), prepare, start
//! - Node: node info, shutdown

pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod progress;
pub mod rebalance;
pub mod registry;
pub mod revision;
pub mod service;
pub mod task;
pub mod types;

mod client;
mod server;

pub use client::CtlClient;
pub use config::{CtlConfig, EngineConfig, LoggingConfig, NodeConfig, ObservabilityConfig, RpcConfig};
pub use error::CtlError;
pub use manager::CtlManager;
pub use orchestrator::TopologyOrchestrator;
pub use rebalance::{
    ChangeMode, ChangeTopologyRequest, EngineNode, EngineTopology, LocalEngine, ProgressCallback,
    ProgressEntry, ProgressMap, RunHandle, TopologyEngine,
};
pub use registry::{TaskRegistry, TaskSet};
pub use revision::{Revision, RevisionAllocator};
pub use server::{CtlServer, ExitHook};
pub use service::PrismCtlClient;
pub use task::{Task, TaskHandle, TaskList, TaskStatus, TaskType};
pub use types::*;
