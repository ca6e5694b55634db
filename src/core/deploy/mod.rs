// src/core/deploy/mod.rs

//! Deployment orchestrator: build an application image, fan it out to
//! every node, roll cluster workloads forward and roll back on failure.

pub mod pipeline;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// A single deployment is a state machine:
/// pending -> building -> deploying -> success / failed / rolled-back.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DeployStatus {
    Pending,
    Building,
    Deploying,
    Success,
    Failed,
    RolledBack,
}

/// A deployable application and its image coordinates.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentConfig {
    pub id: i64,
    pub name: String,
    pub image_repo: String,
    pub current_version: Option<String>,
    pub workload_name: String,
    pub namespace: String,
    pub replicas: i32,
    pub build_context: String,
    pub docker_file: Option<String>,
}

/// One deployment attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentHistory {
    pub id: i64,
    pub deployment_id: i64,
    pub version: String,
    pub previous_version: Option<String>,
    pub deployed_by: String,
    pub status: DeployStatus,
    pub build_output: String,
    pub deploy_output: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A deployment request as accepted by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub config_id: i64,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub skip_build: bool,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Share of distribute targets that may fail before the pipeline aborts:
/// 40% of nodes, rounded down, but never below one node.
pub fn allowed_distribute_failures(total_nodes: usize) -> usize {
    ((total_nodes * 2) / 5).max(1)
}
