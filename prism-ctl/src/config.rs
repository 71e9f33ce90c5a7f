//! Control-plane configuration
//!
//! Loaded from a TOML file. Every field has a default, so a partial or
//! missing file still yields a working configuration.

use crate::error::CtlError;
use crate::types::NodeInfo;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CtlConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Identity reported to the orchestrator
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Unique identifier for this node
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default)]
    pub priority: i64,
}

fn default_node_id() -> String {
    format!("node-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            priority: 0,
        }
    }
}

/// RPC server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcConfig {
    /// Address to bind the control RPC server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long a task-list or topology long-poll may wait, in milliseconds
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout_ms: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:9130".to_string()
}

fn default_request_timeout() -> u64 {
    30000
}

fn default_long_poll_timeout() -> u64 {
    20000
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            request_timeout_ms: default_request_timeout(),
            long_poll_timeout_ms: default_long_poll_timeout(),
        }
    }
}

impl RpcConfig {
    /// Parse bind address into socket address
    pub fn parse_bind_addr(&self) -> std::result::Result<SocketAddr, CtlError> {
        self.bind_addr.parse().map_err(|e| {
            CtlError::Config(format!("Invalid bind address '{}': {}", self.bind_addr, e))
        })
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get long-poll timeout as Duration
    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.long_poll_timeout_ms)
    }
}

/// Settings of the in-process topology engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Index partitions moved by a rebalance
    #[serde(default = "default_index_partitions")]
    pub index_partitions: Vec<String>,

    /// Source partitions feeding each index partition
    #[serde(default = "default_source_partitions")]
    pub source_partitions: usize,

    /// Sequence number every move must reach
    #[serde(default = "default_target_seq")]
    pub target_seq: u64,

    /// Sequence numbers advanced per step
    #[serde(default = "default_seq_step")]
    pub seq_step: u64,

    /// Delay between steps in milliseconds
    #[serde(default = "default_step_interval")]
    pub step_interval_ms: u64,

    /// Members at startup; empty means just this node
    #[serde(default)]
    pub initial_members: Vec<String>,
}

fn default_index_partitions() -> Vec<String> {
    vec!["default_0".to_string(), "default_1".to_string()]
}

fn default_source_partitions() -> usize {
    4
}

fn default_target_seq() -> u64 {
    1000
}

fn default_seq_step() -> u64 {
    100
}

fn default_step_interval() -> u64 {
    250
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_partitions: default_index_partitions(),
            source_partitions: default_source_partitions(),
            target_seq: default_target_seq(),
            seq_step: default_seq_step(),
            step_interval_ms: default_step_interval(),
            initial_members: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Get step interval as Duration
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    /// Log output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Address for the Prometheus exporter; disabled when unset
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl CtlConfig {
    /// Load config from an existing file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: CtlConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        Ok(config)
    }

    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            let config = CtlConfig::default();
            config.save(config_path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Identity to report for this node
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            node_id: self.node.node_id.clone(),
            priority: self.node.priority,
            opaque: serde_json::Value::Null,
        }
    }

    /// Members the engine starts with
    pub fn initial_members(&self) -> Vec<String> {
        if self.engine.initial_members.is_empty() {
            vec![self.node.node_id.clone()]
        } else {
            self.engine.initial_members.clone()
        }
    }

    /// Parse the metrics exporter address, if configured
    pub fn metrics_addr(&self) -> std::result::Result<Option<SocketAddr>, CtlError> {
        self.observability
            .metrics_addr
            .as_deref()
            .map(|addr| {
                addr.parse().map_err(|e| {
                    CtlError::Config(format!("Invalid metrics address '{}': {}", addr, e))
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CtlConfig::default();
        assert_eq!(config.rpc.bind_addr, "127.0.0.1:9130");
        assert_eq!(config.rpc.long_poll_timeout(), Duration::from_secs(20));
        assert_eq!(config.engine.index_partitions.len(), 2);
        assert_eq!(config.logging.format, "pretty");
        assert!(config.node.node_id.starts_with("node-"));
        assert_eq!(config.node.node_id.len(), "node-".len() + 8);
        assert_eq!(config.initial_members(), vec![config.node.node_id.clone()]);
    }

    #[test]
    fn test_partial_toml() {
        let config: CtlConfig = toml::from_str(
            r#"
            [node]
            node_id = "n1"

            [engine]
            seq_step = 7
            initial_members = ["n1", "n2"]
            "#,
        )
        .unwrap();
        assert_eq!(config.node.node_id, "n1");
        assert_eq!(config.engine.seq_step, 7);
        assert_eq!(config.engine.target_seq, 1000);
        assert_eq!(config.initial_members(), vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(config.node_info().node_id, "n1");
    }

    #[test]
    fn test_bad_addresses() {
        let mut config = CtlConfig::default();
        config.rpc.bind_addr = "not-an-addr".to_string();
        assert!(matches!(
            config.rpc.parse_bind_addr(),
            Err(CtlError::Config(_))
        ));

        assert_eq!(config.metrics_addr().unwrap(), None);
        config.observability.metrics_addr = Some("nope".to_string());
        assert!(config.metrics_addr().is_err());
        config.observability.metrics_addr = Some("127.0.0.1:9100".to_string());
        assert!(config.metrics_addr().unwrap().is_some());
    }
}
