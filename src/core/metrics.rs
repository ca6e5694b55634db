// src/core/metrics.rs

//! Prometheus metrics for the control plane: provisioning, deployments,
//! snapshots, restores and the sync engine.
//!
//! Everything registers against the default registry exactly once, on
//! first touch of the `lazy_static` statics.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Cluster / deployment gauges ---
    /// Number of nodes currently in the `ready` state.
    pub static ref NODES_READY: Gauge =
        register_gauge!("coldstored_nodes_ready", "Number of cluster nodes in the ready state.").unwrap();
    /// A boolean gauge indicating if a deployment pipeline is running.
    pub static ref DEPLOY_IN_PROGRESS: Gauge =
        register_gauge!("coldstored_deploy_in_progress", "Deployment pipeline in progress (1 for true, 0 for false).").unwrap();

    // --- Counters ---
    /// Provision pipelines started, labeled by outcome.
    pub static ref PROVISIONS_TOTAL: CounterVec =
        register_counter_vec!("coldstored_provisions_total", "Total provisioning pipelines, labeled by outcome.", &["outcome"]).unwrap();
    /// Deployments finished, labeled by outcome.
    pub static ref DEPLOYMENTS_TOTAL: CounterVec =
        register_counter_vec!("coldstored_deployments_total", "Total deployments, labeled by outcome.", &["outcome"]).unwrap();
    /// Snapshots taken, labeled by class (local/cloud/pre-restore).
    pub static ref SNAPSHOTS_TOTAL: CounterVec =
        register_counter_vec!("coldstored_snapshots_total", "Total snapshots taken, labeled by class.", &["class"]).unwrap();
    /// Restores executed since startup.
    pub static ref RESTORES_TOTAL: Counter =
        register_counter!("coldstored_restores_total", "Total restores executed.").unwrap();
    /// Media/pool uploads, labeled by backend and outcome.
    pub static ref SYNC_UPLOADS_TOTAL: CounterVec =
        register_counter_vec!("coldstored_sync_uploads_total", "Total queue uploads, labeled by backend and outcome.", &["backend", "outcome"]).unwrap();
    /// Files discovered by the pool scanners.
    pub static ref SCANNER_FILES_FOUND_TOTAL: Counter =
        register_counter!("coldstored_scanner_files_found_total", "Total files seen by pool scanners.").unwrap();

    // --- Histograms ---
    /// A histogram of remote shell command latencies.
    pub static ref REMOTE_COMMAND_SECONDS: Histogram =
        register_histogram!("coldstored_remote_command_seconds", "Latency of remote shell commands in seconds.").unwrap();
    /// A histogram of snapshot durations.
    pub static ref SNAPSHOT_SECONDS: Histogram =
        register_histogram!("coldstored_snapshot_seconds", "Duration of database snapshots in seconds.").unwrap();
}

/// Renders every registered metric in the Prometheus text exposition
/// format. An encoding failure yields an empty body rather than a panic
/// in the scrape path.
pub fn encode_metrics() -> String {
    TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}
