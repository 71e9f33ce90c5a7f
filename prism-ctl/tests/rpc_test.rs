//! Tests for the tarpc control server and client over loopback TCP

use prism_ctl::error::CtlError;
use prism_ctl::{
    CtlClient, CtlManager, CtlServer, EngineConfig, LocalEngine, NodeInfo, RpcConfig, TaskType,
    TopologyChange, TopologyChangeType,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct TestServer {
    client: CtlClient,
    manager: Arc<CtlManager>,
    shutdown: CancellationToken,
}

async fn start_server(long_poll_timeout_ms: u64) -> TestServer {
    let engine = Arc::new(LocalEngine::new(
        EngineConfig {
            step_interval_ms: 60_000,
            ..Default::default()
        },
        vec!["n1".to_string()],
    ));
    let manager = Arc::new(CtlManager::new(NodeInfo::new("n1"), engine));

    let config = RpcConfig {
        long_poll_timeout_ms,
        ..Default::default()
    };
    let server = CtlServer::new(config, Arc::clone(&manager));
    let shutdown = server.shutdown_token();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve_on(listener));

    let client = CtlClient::connect(addr, Duration::from_secs(5)).await.unwrap();
    TestServer {
        client,
        manager,
        shutdown,
    }
}

#[tokio::test]
async fn test_node_info() {
    let server = start_server(1_000).await;
    let info = server.client.node_info().await.unwrap();
    assert_eq!(info.node_id, "n1");
    server.shutdown.cancel();
}

#[tokio::test]
async fn test_topology_change_over_rpc() {
    let server = start_server(1_000).await;
    let change = TopologyChange::new("c1", TopologyChangeType::Rebalance, vec!["n1", "n2"]);

    server
        .client
        .prepare_topology_change(change.clone())
        .await
        .unwrap();
    let err = server
        .client
        .prepare_topology_change(change.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CtlError::Conflict(_)));

    server
        .client
        .start_topology_change(change)
        .await
        .unwrap();

    let list = server.client.task_list(b"").await.unwrap();
    assert_eq!(list.tasks.len(), 1);
    assert_eq!(list.tasks[0].task_type, TaskType::Rebalance);
    assert_eq!(list, server.manager.registry().task_list());

    let rev = list.tasks[0].rev.encode();
    server
        .client
        .cancel_task("rebalance:c1", Some(rev.as_slice()))
        .await
        .unwrap();
    assert!(server.manager.registry().task_list().tasks.is_empty());

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_long_poll_times_out_as_canceled() {
    let server = start_server(50).await;
    let rev = server.manager.registry().revision().encode();

    let err = server.client.task_list(&rev).await.unwrap_err();
    assert_eq!(err, CtlError::Canceled);

    let topology = server.client.current_topology(b"").await.unwrap();
    let err = server
        .client
        .current_topology(&topology.rev)
        .await
        .unwrap_err();
    assert_eq!(err, CtlError::Canceled);

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_long_poll_wakes_over_rpc() {
    let server = start_server(5_000).await;
    let rev = server.manager.registry().revision().encode();

    let manager = Arc::clone(&server.manager);
    let waker = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager
            .prepare_topology_change(&TopologyChange::new(
                "c1",
                TopologyChangeType::Rebalance,
                vec!["n1"],
            ))
            .unwrap();
    });

    let list = server.client.task_list(&rev).await.unwrap();
    assert_eq!(list.tasks.len(), 1);
    waker.await.unwrap();

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_errors_cross_the_boundary() {
    let server = start_server(1_000).await;

    let err = server.client.task_list(b"not-a-rev").await.unwrap_err();
    assert!(matches!(err, CtlError::InvalidRevision { .. }));

    let err = server.client.cancel_task("missing", None).await.unwrap_err();
    assert!(matches!(err, CtlError::NotFound(_)));

    let err = server
        .client
        .start_topology_change(TopologyChange::new(
            "c9",
            TopologyChangeType::Rebalance,
            vec!["n1"],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, CtlError::NotFound(_)));

    server.shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_replies_before_exit() {
    let engine = Arc::new(LocalEngine::new(EngineConfig::default(), vec!["n1".to_string()]));
    let manager = Arc::new(CtlManager::new(NodeInfo::new("n1"), engine));

    let exited = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&exited);
    let server = CtlServer::new(RpcConfig::default(), manager)
        .with_exit_hook(Arc::new(move || flag.store(true, Ordering::SeqCst)));
    let shutdown = server.shutdown_token();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = tokio::spawn(server.serve_on(listener));

    let client = CtlClient::connect(addr, Duration::from_secs(5)).await.unwrap();
    client.shutdown().await.unwrap();
    assert!(!exited.load(Ordering::SeqCst));

    tokio::time::timeout(Duration::from_secs(2), serving)
        .await
        .expect("accept loop should stop after the grace period")
        .unwrap()
        .unwrap();
    assert!(shutdown.is_cancelled());

    // The exit hook runs right after the token is canceled
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(exited.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = CtlClient::connect(addr, Duration::from_secs(1)).await;
    assert!(matches!(result, Err(CtlError::Transport(_))));
}
