//! Control-plane observability metrics
//!
//! Provides Prometheus-compatible metrics for:
//! - Task list revision and size
//! - Long-poll waits and cancellations
//! - Topology change lifecycle and progress
//! - RPC duration and errors

use crate::revision::Revision;
use std::time::{Duration, Instant};

/// Update task-list gauges after a committed mutation
pub fn update_task_list_metrics(rev: Revision, task_count: usize) {
    metrics::gauge!("prism_ctl_task_list_revision").set(rev.number() as f64);
    metrics::gauge!("prism_ctl_tasks").set(task_count as f64);
}

/// Record a long-poll that had to wait for a change
pub fn record_long_poll_wait(resource: &str) {
    metrics::counter!(
        "prism_ctl_long_poll_waits_total",
        "resource" => resource.to_string(),
    )
    .increment(1);
}

/// Record a long-poll ended by cancellation
pub fn record_long_poll_canceled(resource: &str) {
    metrics::counter!(
        "prism_ctl_long_poll_canceled_total",
        "resource" => resource.to_string(),
    )
    .increment(1);
}

/// Update the progress gauge of a running task
pub fn record_task_progress(task_id: &str, progress: f64) {
    metrics::gauge!(
        "prism_ctl_task_progress",
        "task" => task_id.to_string(),
    )
    .set(progress);
}

/// Record topology change lifecycle events (prepared, started, canceled, terminated)
pub fn record_topology_change_event(event: &str) {
    metrics::counter!(
        "prism_ctl_topology_change_events_total",
        "event" => event.to_string(),
    )
    .increment(1);
}

/// Record the end of an engine run
pub fn record_engine_run(mode: &str, outcome: &str, duration: Duration) {
    metrics::counter!(
        "prism_ctl_engine_runs_total",
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string(),
    )
    .increment(1);

    metrics::histogram!(
        "prism_ctl_engine_run_duration_seconds",
        "mode" => mode.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record client-side RPC call duration
pub fn record_rpc_duration(method: &str, target: &str, duration: Duration) {
    metrics::histogram!(
        "prism_ctl_rpc_duration_seconds",
        "method" => method.to_string(),
        "target" => target.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record client-side RPC call outcome
pub fn record_rpc_result(method: &str, target: &str, error_type: Option<&str>) {
    let status = if error_type.is_some() { "error" } else { "ok" };
    metrics::counter!(
        "prism_ctl_rpc_requests_total",
        "method" => method.to_string(),
        "target" => target.to_string(),
        "status" => status,
    )
    .increment(1);

    if let Some(error_type) = error_type {
        metrics::counter!(
            "prism_ctl_rpc_errors_total",
            "method" => method.to_string(),
            "error_type" => error_type.to_string(),
        )
        .increment(1);
    }
}

/// Record server-side RPC handler duration
pub fn record_rpc_handler_duration(method: &str, duration: Duration) {
    metrics::histogram!(
        "prism_ctl_rpc_handler_duration_seconds",
        "method" => method.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record server-side RPC handler success
pub fn record_rpc_handler_success(method: &str) {
    metrics::counter!(
        "prism_ctl_rpc_handler_total",
        "method" => method.to_string(),
        "status" => "ok",
    )
    .increment(1);
}

/// Record server-side RPC handler error
pub fn record_rpc_handler_error(method: &str, error_type: &str) {
    metrics::counter!(
        "prism_ctl_rpc_handler_total",
        "method" => method.to_string(),
        "status" => "error",
    )
    .increment(1);

    metrics::counter!(
        "prism_ctl_rpc_handler_errors_total",
        "method" => method.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Guard for timing client RPC calls
pub struct RpcTimer {
    method: &'static str,
    target: String,
    start: Instant,
}

impl RpcTimer {
    /// Start timing an RPC call
    pub fn new(method: &'static str, target: &str) -> Self {
        Self {
            method,
            target: target.to_string(),
            start: Instant::now(),
        }
    }

    /// Record success and duration
    pub fn success(self) {
        record_rpc_duration(self.method, &self.target, self.start.elapsed());
        record_rpc_result(self.method, &self.target, None);
    }

    /// Record error and duration
    pub fn error(self, error_type: &str) {
        record_rpc_duration(self.method, &self.target, self.start.elapsed());
        record_rpc_result(self.method, &self.target, Some(error_type));
    }
}

/// Guard for timing RPC handlers
pub struct RpcHandlerTimer {
    method: &'static str,
    start: Instant,
}

impl RpcHandlerTimer {
    /// Start timing an RPC handler
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            start: Instant::now(),
        }
    }

    /// Record the outcome of a handler result and pass it through
    pub fn finish<T>(self, result: crate::error::Result<T>) -> crate::error::Result<T> {
        match &result {
            Ok(_) => self.success(),
            Err(e) => self.error(e.error_type()),
        }
        result
    }

    /// Record success and duration
    pub fn success(self) {
        record_rpc_handler_duration(self.method, self.start.elapsed());
        record_rpc_handler_success(self.method);
    }

    /// Record error and duration
    pub fn error(self, error_type: &str) {
        record_rpc_handler_duration(self.method, self.start.elapsed());
        record_rpc_handler_error(self.method, error_type);
    }
}
