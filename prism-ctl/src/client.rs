//! Control-plane RPC client
//!
//! Connects to a running control server over TCP; used by the admin
//! subcommands of the `prism-ctl` binary and by tests.

use crate::error::{CtlError, Result};
use crate::metrics::RpcTimer;
use crate::service::PrismCtlClient;
use crate::task::TaskList;
use crate::types::{NodeInfo, Topology, TopologyChange};
use std::net::SocketAddr;
use std::time::Duration;
use tarpc::client::Config as TarpcConfig;
use tarpc::context;
use tokio::net::TcpStream;
use tracing::debug;

/// Client for one control server
pub struct CtlClient {
    addr: String,
    client: PrismCtlClient,
    request_timeout: Duration,
}

impl CtlClient {
    /// Connect to the server at `addr`
    pub async fn connect(addr: SocketAddr, request_timeout: Duration) -> Result<Self> {
        debug!("Connecting to control server at {}", addr);
        let stream = tokio::time::timeout(request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| CtlError::Transport(format!("Connection to {} timed out", addr)))?
            .map_err(|e| CtlError::Transport(format!("Failed to connect to {}: {}", addr, e)))?;

        let transport = tarpc::serde_transport::new(
            tokio_util::codec::Framed::new(
                stream,
                tarpc::tokio_util::codec::LengthDelimitedCodec::new(),
            ),
            tarpc::tokio_serde::formats::Json::default(),
        );
        let client = PrismCtlClient::new(TarpcConfig::default(), transport).spawn();

        Ok(Self {
            addr: addr.to_string(),
            client,
            request_timeout,
        })
    }

    /// Create a context with the configured request timeout
    fn context(&self) -> context::Context {
        let mut ctx = context::current();
        ctx.deadline = std::time::Instant::now() + self.request_timeout;
        ctx
    }

    /// Record the outcome of a call that returns a service-level result
    fn finish<T>(
        timer: RpcTimer,
        response: std::result::Result<Result<T>, tarpc::client::RpcError>,
    ) -> Result<T> {
        match response {
            Ok(Ok(value)) => {
                timer.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                timer.error(e.error_type());
                Err(e)
            }
            Err(e) => {
                timer.error("transport");
                Err(CtlError::Transport(e.to_string()))
            }
        }
    }

    // ========================================
    // Public API
    // ========================================

    pub async fn node_info(&self) -> Result<NodeInfo> {
        let timer = RpcTimer::new("node_info", &self.addr);
        Self::finish(timer, self.client.node_info(self.context()).await.map(Ok))
    }

    /// Task list; an empty `have_rev` returns without waiting
    pub async fn task_list(&self, have_rev: &[u8]) -> Result<TaskList> {
        let timer = RpcTimer::new("task_list", &self.addr);
        let response = self.client.task_list(self.context(), have_rev.to_vec()).await;
        Self::finish(timer, response)
    }

    pub async fn cancel_task(&self, id: &str, rev: Option<&[u8]>) -> Result<()> {
        let timer = RpcTimer::new("cancel_task", &self.addr);
        let response = self
            .client
            .cancel_task(self.context(), id.to_string(), rev.map(<[u8]>::to_vec))
            .await;
        Self::finish(timer, response)
    }

    /// Cluster topology; an empty `have_rev` returns without waiting
    pub async fn current_topology(&self, have_rev: &[u8]) -> Result<Topology> {
        let timer = RpcTimer::new("current_topology", &self.addr);
        let response = self
            .client
            .current_topology(self.context(), have_rev.to_vec())
            .await;
        Self::finish(timer, response)
    }

    pub async fn prepare_topology_change(&self, change: TopologyChange) -> Result<()> {
        let timer = RpcTimer::new("prepare_topology_change", &self.addr);
        let response = self
            .client
            .prepare_topology_change(self.context(), change)
            .await;
        Self::finish(timer, response)
    }

    pub async fn start_topology_change(&self, change: TopologyChange) -> Result<()> {
        let timer = RpcTimer::new("start_topology_change", &self.addr);
        let response = self
            .client
            .start_topology_change(self.context(), change)
            .await;
        Self::finish(timer, response)
    }

    /// Ask the server process to exit
    pub async fn shutdown(&self) -> Result<()> {
        let timer = RpcTimer::new("shutdown", &self.addr);
        Self::finish(timer, self.client.shutdown(self.context()).await.map(Ok))
    }
}
