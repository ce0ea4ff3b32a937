//! Ensemble observability metrics
//!
//! Recorded through the `metrics` facade; installing an exporter is up to
//! the embedding process. Covers:
//! - route lookups
//! - command execution in the pipeline
//! - remote sends
//! - discovery events and cluster sizes

use std::time::{Duration, Instant};

/// Record the outcome of a route lookup ("hit" or "miss")
pub fn record_route_lookup(result: &'static str) {
    metrics::counter!("ensemble_route_lookups_total", "result" => result).increment(1);
}

/// Record pipeline command duration
pub fn record_command_duration(command: &'static str, duration: Duration) {
    metrics::histogram!(
        "ensemble_command_duration_seconds",
        "command" => command,
    )
    .record(duration.as_secs_f64());
}

/// Record a command outcome
pub fn record_command(command: &'static str, status: &'static str) {
    metrics::counter!(
        "ensemble_commands_total",
        "command" => command,
        "status" => status,
    )
    .increment(1);
}

/// Update the number of queued, not yet started, commands
pub fn record_queue_depth(depth: usize) {
    metrics::gauge!("ensemble_pipeline_queue_depth").set(depth as f64);
}

/// Record remote send duration
pub fn record_remote_send_duration(target_node: &str, duration: Duration) {
    metrics::histogram!(
        "ensemble_remote_send_duration_seconds",
        "target_node" => target_node.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record remote send error
pub fn record_remote_error(target_node: &str, error_type: &str) {
    metrics::counter!(
        "ensemble_remote_errors_total",
        "target_node" => target_node.to_string(),
        "error_type" => error_type.to_string(),
    )
    .increment(1);
}

/// Record a discovery event (joined, left, refresh)
pub fn record_discovery_event(cluster: &str, event: &'static str) {
    metrics::counter!(
        "ensemble_discovery_events_total",
        "cluster" => cluster.to_string(),
        "event" => event,
    )
    .increment(1);
}

/// Update the routed node count of a cluster
pub fn record_cluster_nodes(cluster: &str, count: usize) {
    metrics::gauge!(
        "ensemble_cluster_nodes",
        "cluster" => cluster.to_string(),
    )
    .set(count as f64);
}

/// Guard for timing pipeline commands
pub struct CommandTimer {
    command: &'static str,
    start: Instant,
}

impl CommandTimer {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            start: Instant::now(),
        }
    }

    /// Record success and duration
    pub fn success(self) {
        record_command_duration(self.command, self.start.elapsed());
        record_command(self.command, "ok");
    }

    /// Record error and duration
    pub fn error(self) {
        record_command_duration(self.command, self.start.elapsed());
        record_command(self.command, "error");
    }
}

/// Guard for timing remote sends
pub struct RemoteSendTimer {
    target_node: String,
    start: Instant,
}

impl RemoteSendTimer {
    pub fn new(target_node: &str) -> Self {
        Self {
            target_node: target_node.to_string(),
            start: Instant::now(),
        }
    }

    pub fn success(self) {
        record_remote_send_duration(&self.target_node, self.start.elapsed());
    }

    pub fn error(self, error_type: &str) {
        record_remote_send_duration(&self.target_node, self.start.elapsed());
        record_remote_error(&self.target_node, error_type);
    }
}
