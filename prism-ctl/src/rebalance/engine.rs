//! In-process topology engine
//!
//! Keeps the cluster membership in memory and simulates partition moves:
//! every (index partition, source partition) pair is assigned to a member,
//! and each move advances its sequence number on a timer until it reaches
//! the configured target.

use super::{
    ChangeMode, ChangeTopologyRequest, EngineNode, EngineTopology, ProgressCallback,
    ProgressEntry, ProgressMap, RunHandle, TopologyEngine,
};
use crate::config::EngineConfig;
use crate::error::{CtlError, Result};
use crate::metrics;
use crate::notify::ChangeSignal;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error reported when a run is stopped before it completes
pub const STOPPED_ERROR: &str = "topology change stopped";

/// Warning attached to members that received no partitions
const IDLE_MEMBER_WARNING: &str = "no index partitions assigned";

struct ActiveRun {
    handle: RunHandle,
    stop: CancellationToken,
}

struct EngineState {
    rev: u64,
    members: Vec<String>,
    prev_warnings: BTreeMap<String, Vec<String>>,
    prev_errors: Vec<String>,
    current_run: Option<ActiveRun>,
    signal: ChangeSignal,
    next_run_id: u64,
}

impl EngineState {
    fn snapshot(&self) -> EngineTopology {
        EngineTopology {
            rev: self.rev.to_string(),
            member_nodes: self.members.iter().map(EngineNode::new).collect(),
            prev_warnings: self.prev_warnings.clone(),
            prev_errors: self.prev_errors.clone(),
        }
    }
}

/// Parameters of one run, fixed when the change is accepted
struct RunPlan {
    handle: RunHandle,
    mode: ChangeMode,
    members: Vec<String>,
    progress: ProgressMap,
    seq_step: u64,
    step_interval: Duration,
}

/// Engine that keeps membership in memory and simulates partition moves
pub struct LocalEngine {
    config: EngineConfig,
    state: Arc<Mutex<EngineState>>,
}

impl LocalEngine {
    /// Create an engine whose topology starts at revision 1 with `members`
    pub fn new(config: EngineConfig, members: Vec<String>) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(EngineState {
                rev: 1,
                members,
                prev_warnings: BTreeMap::new(),
                prev_errors: Vec::new(),
                current_run: None,
                signal: ChangeSignal::new(),
                next_run_id: 1,
            })),
        }
    }

    /// Handle of the change currently running, if any
    pub fn current_run(&self) -> Option<RunHandle> {
        self.state.lock().current_run.as_ref().map(|r| r.handle.clone())
    }

    /// Assign every (index partition, source partition) pair to a member,
    /// round-robin in request order
    fn plan_moves(&self, mode: ChangeMode, members: &[String]) -> ProgressMap {
        let target = self.config.target_seq;
        let (init, want) = match mode {
            ChangeMode::Rebalance => (0, target),
            // Nothing moves in a hard failover
            ChangeMode::FailoverHard => (target, target),
        };

        let mut progress = ProgressMap::new();
        let mut next = 0usize;
        for pindex in &self.config.index_partitions {
            let sources = progress.entry(pindex.clone()).or_default();
            for source in 0..self.config.source_partitions {
                let node = &members[next % members.len()];
                next += 1;
                sources
                    .entry(source.to_string())
                    .or_default()
                    .insert(node.clone(), ProgressEntry::new(init, init, want));
            }
        }
        progress
    }
}

#[async_trait]
impl TopologyEngine for LocalEngine {
    fn get_topology(&self) -> EngineTopology {
        self.state.lock().snapshot()
    }

    async fn wait_get_topology(
        &self,
        have_rev: &str,
        cancel: &CancellationToken,
    ) -> Result<EngineTopology> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if have_rev.is_empty() || state.rev.to_string() != have_rev {
                    return Ok(state.snapshot());
                }
                state.signal.subscribe()
            };

            metrics::record_long_poll_wait("topology");
            if let Err(err) = waiter.fired_or_canceled(cancel).await {
                debug!("Topology wait canceled, have_rev: {}", have_rev);
                metrics::record_long_poll_canceled("topology");
                return Err(err);
            }
        }
    }

    fn change_topology(
        &self,
        request: ChangeTopologyRequest,
        on_progress: ProgressCallback,
    ) -> Result<RunHandle> {
        if request.member_node_ids.is_empty() {
            return Err(CtlError::Engine(
                "topology change needs at least one member".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CtlError::Engine(format!("no async runtime: {}", e)))?;

        let mut state = self.state.lock();
        if let Some(run) = &state.current_run {
            return Err(CtlError::Conflict(format!(
                "topology change {} is already running",
                run.handle
            )));
        }
        if !request.rev.is_empty() && request.rev != state.rev.to_string() {
            return Err(CtlError::Conflict(format!(
                "topology revision {} is stale, current is {}",
                request.rev, state.rev
            )));
        }

        let handle = RunHandle(format!("run-{}", state.next_run_id));
        state.next_run_id += 1;
        let stop = CancellationToken::new();
        state.current_run = Some(ActiveRun {
            handle: handle.clone(),
            stop: stop.clone(),
        });
        drop(state);

        let plan = RunPlan {
            handle: handle.clone(),
            mode: request.mode,
            progress: self.plan_moves(request.mode, &request.member_node_ids),
            members: request.member_node_ids,
            seq_step: self.config.seq_step.max(1),
            step_interval: self.config.step_interval(),
        };

        info!(
            "Starting topology change {} (mode: {}, members: {:?})",
            handle, plan.mode, plan.members
        );
        runtime.spawn(drive(Arc::clone(&self.state), plan, on_progress, stop));
        Ok(handle)
    }

    fn stop_change_topology(&self, run: &RunHandle) {
        let state = self.state.lock();
        match &state.current_run {
            Some(active) if &active.handle == run => {
                info!("Stopping topology change {}", run);
                active.stop.cancel();
            }
            _ => debug!("Stop for inactive topology change {} ignored", run),
        }
    }
}

/// Run one change to completion or until stopped, then send the
/// termination signal
async fn drive(
    state: Arc<Mutex<EngineState>>,
    mut plan: RunPlan,
    on_progress: ProgressCallback,
    stop: CancellationToken,
) {
    let started = Instant::now();

    let stopped = loop {
        let table = on_progress(Some(&plan.progress), &[]);
        debug!("Topology change {} progress:\n{}", plan.handle, table);

        if is_complete(&plan.progress) {
            break false;
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => break true,
            _ = tokio::time::sleep(plan.step_interval) => {}
        }
        advance(&mut plan.progress, plan.seq_step);
    };

    let errors = {
        let mut state = state.lock();
        state.rev += 1;
        if stopped {
            state.prev_warnings.clear();
            state.prev_errors = vec![STOPPED_ERROR.to_string()];
        } else {
            state.prev_warnings = idle_member_warnings(&plan.members, &plan.progress);
            state.prev_errors.clear();
            state.members = plan.members.clone();
        }
        if state
            .current_run
            .as_ref()
            .is_some_and(|r| r.handle == plan.handle)
        {
            state.current_run = None;
        }
        state.signal.fire();
        state.prev_errors.clone()
    };

    let outcome = if stopped { "stopped" } else { "completed" };
    metrics::record_engine_run(plan.mode.as_str(), outcome, started.elapsed());
    if stopped {
        warn!("Topology change {} stopped after {:?}", plan.handle, started.elapsed());
    } else {
        info!(
            "Topology change {} completed in {:?}, members: {:?}",
            plan.handle,
            started.elapsed(),
            plan.members
        );
    }

    let marker = on_progress(None, &errors);
    debug!("Topology change {} termination acknowledged: {}", plan.handle, marker);
}

fn entries_mut(progress: &mut ProgressMap) -> impl Iterator<Item = &mut ProgressEntry> {
    progress
        .values_mut()
        .flat_map(|sources| sources.values_mut())
        .flat_map(|nodes| nodes.values_mut())
}

fn is_complete(progress: &ProgressMap) -> bool {
    progress
        .values()
        .flat_map(|sources| sources.values())
        .flat_map(|nodes| nodes.values())
        .all(|entry| entry.curr_seq >= entry.want_seq)
}

fn advance(progress: &mut ProgressMap, step: u64) {
    for entry in entries_mut(progress) {
        entry.curr_seq = entry.curr_seq.saturating_add(step).min(entry.want_seq);
    }
}

fn idle_member_warnings(
    members: &[String],
    progress: &ProgressMap,
) -> BTreeMap<String, Vec<String>> {
    members
        .iter()
        .filter(|member| {
            !progress
                .values()
                .flat_map(|sources| sources.values())
                .any(|nodes| nodes.contains_key(member.as_str()))
        })
        .map(|member| (member.clone(), vec![IDLE_MEMBER_WARNING.to_string()]))
        .collect()
}
