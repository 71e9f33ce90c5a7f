//! Control-plane RPC server implementation
//!
//! Wraps [`CtlManager`] to serve control RPC requests over TCP.

use crate::config::RpcConfig;
use crate::error::{CtlError, Result};
use crate::manager::CtlManager;
use crate::metrics::RpcHandlerTimer;
use crate::service::PrismCtl;
use crate::task::TaskList;
use crate::types::{NodeInfo, Topology, TopologyChange};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tarpc::context::Context;
use tarpc::server::{BaseChannel, Channel};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay between answering a shutdown request and exiting
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Action run once a shutdown request has been answered
pub type ExitHook = Arc<dyn Fn() + Send + Sync>;

/// Control-plane RPC server
pub struct CtlServer {
    config: RpcConfig,
    manager: Arc<CtlManager>,
    shutdown: CancellationToken,
    exit: ExitHook,
}

impl CtlServer {
    /// Create a new control-plane server
    pub fn new(config: RpcConfig, manager: Arc<CtlManager>) -> Self {
        let exit_manager = Arc::clone(&manager);
        Self {
            config,
            manager,
            shutdown: CancellationToken::new(),
            exit: Arc::new(move || {
                exit_manager.shutdown();
            }),
        }
    }

    /// Replace the process exit that follows a shutdown request
    pub fn with_exit_hook(mut self, exit: ExitHook) -> Self {
        self.exit = exit;
        self
    }

    /// Token that stops the accept loop and ends pending long-polls
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured address and serve until shut down
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.parse_bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener until shut down
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        info!(
            "Control server started on {}, node_id={}",
            listener.local_addr()?,
            self.manager.get_node_info().node_id
        );

        let handler = CtlHandler {
            manager: Arc::clone(&self.manager),
            long_poll_timeout: self.config.long_poll_timeout(),
            shutdown: self.shutdown.clone(),
            exit: Arc::clone(&self.exit),
        };

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    tokio::spawn(Self::handle_connection(stream, handler.clone()));
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                }
            }
        }

        info!("Control server stopped");
        Ok(())
    }

    /// Serve a single connection
    async fn handle_connection(stream: TcpStream, handler: CtlHandler) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let transport = tarpc::serde_transport::new(
            tokio_util::codec::Framed::new(
                stream,
                tarpc::tokio_util::codec::LengthDelimitedCodec::new(),
            ),
            tarpc::tokio_serde::formats::Json::default(),
        );

        BaseChannel::with_defaults(transport)
            .execute(handler.serve())
            .for_each(|response| async move {
                tokio::spawn(response);
            })
            .await;

        debug!("Connection closed");
    }
}

/// Handler that implements the PrismCtl service
#[derive(Clone)]
struct CtlHandler {
    manager: Arc<CtlManager>,
    long_poll_timeout: Duration,
    shutdown: CancellationToken,
    exit: ExitHook,
}

impl CtlHandler {
    /// Run a long-poll until it completes, the long-poll timeout elapses or
    /// the server shuts down. The latter two end it with `Canceled`.
    async fn long_poll<T, F>(&self, poll: impl FnOnce(CancellationToken) -> F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let cancel = self.shutdown.child_token();
        match tokio::time::timeout(self.long_poll_timeout, poll(cancel)).await {
            Ok(result) => result,
            Err(_) => Err(CtlError::Canceled),
        }
    }
}

impl PrismCtl for CtlHandler {
    async fn node_info(self, _ctx: Context) -> NodeInfo {
        let timer = RpcHandlerTimer::new("node_info");
        let info = self.manager.get_node_info();
        timer.success();
        info
    }

    async fn task_list(self, _ctx: Context, have_rev: Vec<u8>) -> Result<TaskList> {
        let timer = RpcHandlerTimer::new("task_list");
        let manager = Arc::clone(&self.manager);
        let result = self
            .long_poll(|cancel| async move { manager.get_task_list(&have_rev, &cancel).await })
            .await;
        timer.finish(result)
    }

    async fn cancel_task(self, _ctx: Context, id: String, rev: Option<Vec<u8>>) -> Result<()> {
        let timer = RpcHandlerTimer::new("cancel_task");
        timer.finish(self.manager.cancel_task(&id, rev.as_deref()))
    }

    async fn current_topology(self, _ctx: Context, have_rev: Vec<u8>) -> Result<Topology> {
        let timer = RpcHandlerTimer::new("current_topology");
        let manager = Arc::clone(&self.manager);
        let result = self
            .long_poll(|cancel| async move {
                manager.get_current_topology(&have_rev, &cancel).await
            })
            .await;
        timer.finish(result)
    }

    async fn prepare_topology_change(self, _ctx: Context, change: TopologyChange) -> Result<()> {
        let timer = RpcHandlerTimer::new("prepare_topology_change");
        timer.finish(self.manager.prepare_topology_change(&change))
    }

    async fn start_topology_change(self, _ctx: Context, change: TopologyChange) -> Result<()> {
        let timer = RpcHandlerTimer::new("start_topology_change");
        timer.finish(self.manager.start_topology_change(&change))
    }

    async fn shutdown(self, _ctx: Context) {
        let timer = RpcHandlerTimer::new("shutdown");
        info!("Shutdown requested over RPC");

        // The accept loop keeps running until the reply is on the wire
        let shutdown = self.shutdown.clone();
        let exit = Arc::clone(&self.exit);
        tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            shutdown.cancel();
            exit();
        });
        timer.success();
    }
}
