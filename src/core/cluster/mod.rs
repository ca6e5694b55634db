// src/core/cluster/mod.rs

//! Cluster control plane: node inventory, provisioning pipelines and
//! day-two operations, all driven over the remote shell.

pub mod ops;
pub mod provision;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Firewall ports opened during provisioning: ssh, the API server,
/// the kubelet, the flannel VXLAN overlay and the metrics exporter.
pub const FIREWALL_TCP_PORTS: &[u16] = &[22, 6443, 10250, 9100];
pub const FIREWALL_UDP_PORTS: &[u16] = &[8472];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
    Backup,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Pending,
    Connecting,
    Installing,
    Joining,
    Ready,
    Failed,
    Removed,
}

impl NodeStatus {
    /// `removed` is terminal; `failed` is reachable from anywhere else.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        match (self, next) {
            (Removed, _) => false,
            (_, Failed) => true,
            (Pending, Connecting) => true,
            (Connecting, Installing) => true,
            (Installing, Joining) => true,
            (Joining, Ready) => true,
            (Failed, Connecting) => true,
            (Ready, Removed) | (Failed, Removed) => true,
            _ => false,
        }
    }
}

/// A member of the cluster inventory.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: i64,
    pub address: String,
    pub hostname: Option<String>,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub shell_user: Option<String>,
    pub shell_port: i32,
    pub os_info: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Success,
    Failed,
}

/// One row of the append-only provisioning log.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionStepLog {
    pub id: i64,
    pub node_id: i64,
    pub step: String,
    pub status: StepStatus,
    pub message: String,
    pub output: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Derives a hostname from an IP address when none was supplied:
/// the last octet becomes `k3s-node-<octet>`.
pub fn derive_hostname(address: &str) -> String {
    if let Ok(ip) = address.parse::<std::net::Ipv4Addr>() {
        return format!("k3s-node-{}", ip.octets()[3]);
    }
    let sanitized: String = address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("k3s-node-{sanitized}")
}
