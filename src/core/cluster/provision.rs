// src/core/cluster/provision.rs

//! The node provisioning pipeline. Steps run strictly in order, each with
//! its own timeout and step-log row; the first failure moves the node to
//! `failed` and terminates the pipeline.

use super::store::NodeStore;
use super::{
    FIREWALL_TCP_PORTS, FIREWALL_UDP_PORTS, Node, NodeRole, NodeStatus, StepStatus,
    derive_hostname,
};
use crate::core::errors::ColdStoreError;
use crate::core::metrics;
use crate::core::remote::{RemoteAuth, RemoteTarget, shell_quote};
use crate::core::state::{AppState, ProgressEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on waiting for the cluster service to report active.
const SERVICE_WAIT: Duration = Duration::from_secs(120);

/// Version of the node metrics exporter installed on every node.
const NODE_EXPORTER_VERSION: &str = "1.8.2";

struct StepSpec {
    name: &'static str,
    script: String,
    timeout: Duration,
}

pub struct ProvisionPipeline {
    state: Arc<AppState>,
    store: NodeStore,
}

impl ProvisionPipeline {
    pub fn new(state: Arc<AppState>) -> Self {
        let store = NodeStore::new(state.db.clone());
        Self { state, store }
    }

    /// Runs the install pipeline for a node. The per-node lock is held for
    /// the whole pipeline; a concurrent request gets a busy error.
    pub async fn run(
        &self,
        node_id: i64,
        auth: RemoteAuth,
        cancel: CancellationToken,
    ) -> Result<(), ColdStoreError> {
        let guard = self.state.try_node_lock(node_id)?;
        self.run_locked(guard, node_id, auth, cancel).await
    }

    /// Runs the pipeline with a lock the caller already holds. API handlers
    /// acquire the guard synchronously so a concurrent request is rejected
    /// before anything is scheduled, then hand it to the pipeline task.
    pub async fn run_locked(
        &self,
        guard: OwnedMutexGuard<()>,
        node_id: i64,
        auth: RemoteAuth,
        cancel: CancellationToken,
    ) -> Result<(), ColdStoreError> {
        let _guard = guard;
        let node = self.store.get(node_id).await?;
        if node.status == NodeStatus::Removed {
            return Err(ColdStoreError::Validation(format!(
                "node {node_id} has been removed"
            )));
        }

        let topic = format!("node:{node_id}");
        let progress = self.state.progress.publisher(&topic);
        let result = self
            .run_inner(&node, &auth, &cancel, &progress)
            .await;

        match &result {
            Ok(()) => metrics::PROVISIONS_TOTAL.with_label_values(&["success"]).inc(),
            Err(e) => {
                metrics::PROVISIONS_TOTAL.with_label_values(&["failed"]).inc();
                self.store.mark_failed(node_id, &e.to_string()).await?;
                emit(&progress, "pipeline", "failed", e.to_string());
            }
        }
        self.state.progress.close(&topic);
        result
    }

    async fn run_inner(
        &self,
        node: &Node,
        auth: &RemoteAuth,
        cancel: &CancellationToken,
        progress: &broadcast::Sender<ProgressEvent>,
    ) -> Result<(), ColdStoreError> {
        let config = &self.state.config;
        let target = target_for(node, &config.ssh.user);
        let shell = &self.state.shell;

        self.store
            .transition(node.id, node.status, NodeStatus::Connecting)
            .await?;
        emit(progress, "connect", "running", format!("connecting to {}", node.address));

        shell.test_connection(&target, auth, cancel).await?;
        let os_info = shell.get_os_info(&target, auth, cancel).await?;
        self.store.set_os_info(node.id, &os_info).await?;
        emit(progress, "connect", "success", os_info);

        self.store
            .transition(node.id, NodeStatus::Connecting, NodeStatus::Installing)
            .await?;

        let hostname = node
            .hostname
            .clone()
            .unwrap_or_else(|| derive_hostname(&node.address));
        self.store.set_hostname(node.id, &hostname).await?;

        let steps = self.build_steps(node, &hostname)?;
        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ColdStoreError::Cancelled);
            }
            self.run_step(node, auth, &target, step, cancel, progress)
                .await?;

            // The node is installing until the cluster binary is in place,
            // then joining until the pipeline completes.
            if index == 3 {
                self.store
                    .transition(node.id, NodeStatus::Installing, NodeStatus::Joining)
                    .await?;
            }
        }

        self.store.mark_ready(node.id).await?;
        emit(progress, "pipeline", "success", format!("node {hostname} is ready"));
        info!(node = node.id, hostname = %hostname, "provisioning complete");
        Ok(())
    }

    async fn run_step(
        &self,
        node: &Node,
        auth: &RemoteAuth,
        target: &RemoteTarget,
        step: &StepSpec,
        cancel: &CancellationToken,
        progress: &broadcast::Sender<ProgressEvent>,
    ) -> Result<(), ColdStoreError> {
        let step_id = self.store.start_step(node.id, step.name).await?;
        emit(progress, step.name, "running", "");

        let outcome = self
            .state
            .shell
            .execute_script(target, auth, &step.script, step.timeout, cancel)
            .await
            .and_then(|output| output.into_result());

        match outcome {
            Ok(output) => {
                self.store
                    .finish_step(step_id, StepStatus::Success, "", &excerpt(&output.stdout))
                    .await?;
                emit(progress, step.name, "success", "");
                Ok(())
            }
            Err(e) => {
                let (message, output_text) = match &e {
                    ColdStoreError::RemoteCommandFailed { stderr, .. } => {
                        (e.to_string(), stderr.clone())
                    }
                    other => (other.to_string(), String::new()),
                };
                warn!(node = node.id, step = step.name, error = %message, "provision step failed");
                self.store
                    .finish_step(step_id, StepStatus::Failed, &message, &excerpt(&output_text))
                    .await?;
                emit(progress, step.name, "failed", message);
                Err(e)
            }
        }
    }

    /// The pipeline reproduced exactly: package index, base packages,
    /// hostname, cluster binary, service wait, metrics exporter, firewall.
    fn build_steps(&self, node: &Node, hostname: &str) -> Result<Vec<StepSpec>, ColdStoreError> {
        let config = &self.state.config;
        let install_script = match node.role {
            NodeRole::ControlPlane => format!(
                "curl -sfL https://get.k3s.io | INSTALL_K3S_EXEC={} sh -s -",
                shell_quote(&format!("server --node-ip {}", node.address)),
            ),
            NodeRole::Worker | NodeRole::Backup => {
                let join_url = config.cluster.join_url.as_deref().ok_or_else(|| {
                    ColdStoreError::Validation(
                        "cluster join URL is not configured".to_string(),
                    )
                })?;
                let join_token = config.cluster.join_token.as_deref().ok_or_else(|| {
                    ColdStoreError::Validation(
                        "cluster join token is not configured".to_string(),
                    )
                })?;
                format!(
                    "curl -sfL https://get.k3s.io | K3S_URL={} K3S_TOKEN={} sh -s - agent --node-ip {}",
                    shell_quote(join_url),
                    shell_quote(join_token),
                    shell_quote(&node.address),
                )
            }
        };

        let service_name = match node.role {
            NodeRole::ControlPlane => "k3s",
            _ => "k3s-agent",
        };
        let wait_attempts = SERVICE_WAIT.as_secs() / 5;

        Ok(vec![
            StepSpec {
                name: "update-packages",
                script: "apt-get update -y".to_string(),
                timeout: Duration::from_secs(120),
            },
            StepSpec {
                name: "install-base-packages",
                script: "DEBIAN_FRONTEND=noninteractive apt-get install -y curl ca-certificates open-iscsi"
                    .to_string(),
                timeout: Duration::from_secs(180),
            },
            StepSpec {
                name: "set-hostname",
                script: format!("hostnamectl set-hostname {}", shell_quote(hostname)),
                timeout: Duration::from_secs(30),
            },
            StepSpec {
                name: "install-cluster-binary",
                script: install_script,
                timeout: Duration::from_secs(600),
            },
            StepSpec {
                name: "wait-service-active",
                script: format!(
                    "i=0; while [ $i -lt {wait_attempts} ]; do \
                     systemctl is-active --quiet {service_name} && exit 0; \
                     i=$((i+1)); sleep 5; done; \
                     echo '{service_name} did not become active' >&2; exit 1"
                ),
                timeout: SERVICE_WAIT + Duration::from_secs(10),
            },
            StepSpec {
                name: "install-node-exporter",
                script: node_exporter_script(),
                timeout: Duration::from_secs(300),
            },
            StepSpec {
                name: "open-firewall-ports",
                script: firewall_script(),
                timeout: Duration::from_secs(60),
            },
        ])
    }
}

/// The node metrics exporter runs under a supervised systemd unit.
fn node_exporter_script() -> String {
    format!(
        r#"set -e
curl -sL https://github.com/prometheus/node_exporter/releases/download/v{ver}/node_exporter-{ver}.linux-amd64.tar.gz | tar -xz -C /tmp
install -m 0755 /tmp/node_exporter-{ver}.linux-amd64/node_exporter /usr/local/bin/node_exporter
rm -rf /tmp/node_exporter-{ver}.linux-amd64
cat > /etc/systemd/system/node_exporter.service <<'UNIT'
[Unit]
Description=Prometheus Node Exporter
After=network.target

[Service]
User=root
ExecStart=/usr/local/bin/node_exporter
Restart=always

[Install]
WantedBy=multi-user.target
UNIT
systemctl daemon-reload
systemctl enable --now node_exporter"#,
        ver = NODE_EXPORTER_VERSION
    )
}

/// Opens the required ports via ufw, falling back to iptables on hosts
/// without it.
fn firewall_script() -> String {
    let mut ufw = String::new();
    let mut iptables = String::new();
    for port in FIREWALL_TCP_PORTS {
        ufw.push_str(&format!("ufw allow {port}/tcp\n"));
        iptables.push_str(&format!(
            "iptables -C INPUT -p tcp --dport {port} -j ACCEPT 2>/dev/null || iptables -A INPUT -p tcp --dport {port} -j ACCEPT\n"
        ));
    }
    for port in FIREWALL_UDP_PORTS {
        ufw.push_str(&format!("ufw allow {port}/udp\n"));
        iptables.push_str(&format!(
            "iptables -C INPUT -p udp --dport {port} -j ACCEPT 2>/dev/null || iptables -A INPUT -p udp --dport {port} -j ACCEPT\n"
        ));
    }
    format!(
        "set -e\nif command -v ufw >/dev/null 2>&1; then\n{ufw}else\n{iptables}fi"
    )
}

pub fn target_for(node: &Node, default_user: &str) -> RemoteTarget {
    RemoteTarget {
        host: node.address.clone(),
        port: node.shell_port as u16,
        user: node
            .shell_user
            .clone()
            .unwrap_or_else(|| default_user.to_string()),
    }
}

fn emit(progress: &broadcast::Sender<ProgressEvent>, step: &str, status: &str, message: impl Into<String>) {
    // Send never blocks; lagging consumers lose old events.
    let _ = progress.send(ProgressEvent::new(step, status, message));
}

/// Step logs keep a bounded excerpt of command output.
fn excerpt(output: &str) -> String {
    output.trim().chars().take(4000).collect()
}
