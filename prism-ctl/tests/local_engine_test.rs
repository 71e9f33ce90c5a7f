//! End-to-end topology changes driven by the in-process engine

use prism_ctl::error::CtlError;
use prism_ctl::rebalance::STOPPED_ERROR;
use prism_ctl::{
    CtlManager, EngineConfig, LocalEngine, NodeInfo, TaskList, TaskStatus, TopologyChange,
    TopologyChangeType, TopologyEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn engine_config(step_interval_ms: u64) -> EngineConfig {
    EngineConfig {
        index_partitions: vec!["default_0".to_string(), "default_1".to_string()],
        source_partitions: 2,
        target_seq: 40,
        seq_step: 10,
        step_interval_ms,
        initial_members: Vec::new(),
    }
}

fn setup(step_interval_ms: u64) -> (Arc<LocalEngine>, Arc<CtlManager>) {
    let engine = Arc::new(LocalEngine::new(
        engine_config(step_interval_ms),
        vec!["n1".to_string()],
    ));
    let manager = Arc::new(CtlManager::new(NodeInfo::new("n1"), engine.clone()));
    (engine, manager)
}

/// Long-poll the task list until `done` holds
async fn wait_for_tasks(manager: &CtlManager, done: impl Fn(&TaskList) -> bool) -> TaskList {
    let cancel = CancellationToken::new();
    let mut list = manager.get_task_list(b"", &cancel).await.unwrap();
    while !done(&list) {
        list = tokio::time::timeout(
            Duration::from_secs(5),
            manager.get_task_list(&list.rev.encode(), &cancel),
        )
        .await
        .expect("task list should keep changing")
        .unwrap();
    }
    list
}

#[tokio::test]
async fn test_rebalance_runs_to_termination() {
    let (engine, manager) = setup(5);
    let change = TopologyChange::new("c1", TopologyChangeType::Rebalance, vec!["n1", "n2"])
        .with_topology_rev("1");

    manager.prepare_topology_change(&change).unwrap();
    manager.start_topology_change(&change).unwrap();

    let list = wait_for_tasks(&manager, |list| {
        list.get("rebalance:c1")
            .is_some_and(|t| t.status.is_terminal())
    })
    .await;

    let task = list.get("rebalance:c1").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.is_empty());
    assert!((task.progress - 1.0).abs() < f64::EPSILON);
    let detailed = task.detailed_progress.as_ref().unwrap();
    assert_eq!(detailed.len(), 2);

    let cancel = CancellationToken::new();
    let topology = manager.get_current_topology(b"", &cancel).await.unwrap();
    assert_eq!(topology.rev, b"2".to_vec());
    assert_eq!(topology.nodes, vec!["n1".to_string(), "n2".to_string()]);
    assert!(topology.is_balanced);
    assert!(engine.current_run().is_none());
}

#[tokio::test]
async fn test_cancel_stops_engine_run() {
    let (engine, manager) = setup(60_000);
    let change = TopologyChange::new("c1", TopologyChangeType::Rebalance, vec!["n1", "n2"]);

    manager.prepare_topology_change(&change).unwrap();
    manager.start_topology_change(&change).unwrap();
    assert!(engine.current_run().is_some());

    let cancel = CancellationToken::new();
    let waiter = {
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.get_current_topology(b"1", &cancel).await })
    };

    manager.cancel_task("rebalance:c1", None).unwrap();

    let topology = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("stopped run should bump the topology revision")
        .unwrap()
        .unwrap();

    assert_eq!(topology.nodes, vec!["n1".to_string()]);
    assert!(!topology.is_balanced);
    assert_eq!(
        topology.messages,
        vec![format!("error: {}", STOPPED_ERROR)]
    );
    assert!(manager.registry().task_list().tasks.is_empty());
    assert!(engine.current_run().is_none());
}

#[tokio::test]
async fn test_failover_completes_immediately() {
    let (_engine, manager) = setup(60_000);
    let change = TopologyChange::new("f1", TopologyChangeType::Failover, vec!["n2"]);

    manager.prepare_topology_change(&change).unwrap();
    manager.start_topology_change(&change).unwrap();

    let list = wait_for_tasks(&manager, |list| {
        list.get("rebalance:f1")
            .is_some_and(|t| t.status == TaskStatus::Failed)
    })
    .await;
    assert_eq!(list.tasks.len(), 1);

    let cancel = CancellationToken::new();
    let topology = manager.get_current_topology(b"", &cancel).await.unwrap();
    assert_eq!(topology.nodes, vec!["n2".to_string()]);
}

#[tokio::test]
async fn test_stale_topology_revision() {
    let (_engine, manager) = setup(5);
    let change = TopologyChange::new("c1", TopologyChangeType::Rebalance, vec!["n1"])
        .with_topology_rev("42");

    assert!(matches!(
        manager.prepare_topology_change(&change),
        Err(CtlError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_empty_membership_is_engine_error() {
    let (_engine, manager) = setup(5);
    let change = TopologyChange::new("c1", TopologyChangeType::Rebalance, Vec::<String>::new());

    manager.prepare_topology_change(&change).unwrap();
    assert!(matches!(
        manager.start_topology_change(&change),
        Err(CtlError::Engine(_))
    ));
    assert!(manager.registry().task("prepare:c1").is_some());
}

#[tokio::test]
async fn test_topology_long_poll_canceled() {
    let (engine, _manager) = setup(5);
    let cancel = CancellationToken::new();

    let waiter = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.wait_get_topology("1", &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Err(CtlError::Canceled));
}
