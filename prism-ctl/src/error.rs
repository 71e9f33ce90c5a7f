//! Control-plane error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the task registry, the topology orchestrator and the
/// RPC boundary around them.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtlError {
    /// Stale or contradictory revision, or a topology change already in flight
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not permitted for the target's current state
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Caller's cancellation signal fired while waiting
    #[error("Canceled")]
    Canceled,

    #[error("Invalid revision {input:?}: {reason}")]
    InvalidRevision { input: String, reason: String },

    #[error("Topology engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CtlError {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            CtlError::Conflict(_) => "conflict",
            CtlError::NotFound(_) => "not_found",
            CtlError::NotSupported(_) => "not_supported",
            CtlError::Canceled => "canceled",
            CtlError::InvalidRevision { .. } => "invalid_revision",
            CtlError::Engine(_) => "engine",
            CtlError::Config(_) => "config",
            CtlError::Transport(_) => "transport",
            CtlError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for CtlError {
    fn from(err: std::io::Error) -> Self {
        CtlError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CtlError {
    fn from(err: serde_json::Error) -> Self {
        CtlError::Internal(format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, CtlError>;
