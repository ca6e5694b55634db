// src/core/cluster/ops.rs

//! Day-two node operations: add/remove, drain, cordon, reboot, logs and
//! the cluster join token. Drains and cordons are issued via the
//! control-plane node.

use super::provision::{ProvisionPipeline, target_for};
use super::store::NodeStore;
use super::{Node, NodeRole, derive_hostname};
use crate::core::errors::ColdStoreError;
use crate::core::remote::{RemoteAuth, RemoteTarget, shell_quote};
use crate::core::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const OP_TIMEOUT: Duration = Duration::from_secs(150);

/// Builds the default remote auth from the server configuration.
pub fn auth_from_config(state: &AppState) -> RemoteAuth {
    RemoteAuth {
        key_path: state.config.ssh.key_path.clone(),
        password: state.config.ssh.password.clone(),
    }
}

pub struct ClusterOps {
    state: Arc<AppState>,
    store: NodeStore,
}

impl ClusterOps {
    pub fn new(state: Arc<AppState>) -> Self {
        let store = NodeStore::new(state.db.clone());
        Self { state, store }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Creates a node in `pending`. With `auto_setup` the provisioning
    /// pipeline is scheduled in the background.
    pub async fn add_node(
        &self,
        address: &str,
        hostname: Option<&str>,
        role: NodeRole,
        auth: Option<RemoteAuth>,
        auto_setup: bool,
    ) -> Result<Node, ColdStoreError> {
        if address.parse::<std::net::IpAddr>().is_err() {
            return Err(ColdStoreError::Validation(format!(
                "'{address}' is not a valid node address"
            )));
        }
        let derived;
        let hostname = match hostname {
            Some(h) => Some(h),
            None => {
                derived = derive_hostname(address);
                Some(derived.as_str())
            }
        };
        let node = self
            .store
            .insert(
                address,
                hostname,
                role,
                Some(&self.state.config.ssh.user),
                self.state.config.ssh.port,
            )
            .await?;

        if auto_setup {
            let state = self.state.clone();
            let node_id = node.id;
            let auth = auth.unwrap_or_else(|| auth_from_config(&state));
            tokio::spawn(async move {
                let pipeline = ProvisionPipeline::new(state);
                if let Err(e) = pipeline.run(node_id, auth, CancellationToken::new()).await {
                    warn!(node = node_id, error = %e, "auto-setup provisioning failed");
                }
            });
        }
        Ok(node)
    }

    /// Runs the provisioning pipeline for an existing node, synchronously.
    pub async fn provision_node(
        &self,
        node_id: i64,
        auth: Option<RemoteAuth>,
        cancel: CancellationToken,
    ) -> Result<(), ColdStoreError> {
        let auth = auth.unwrap_or_else(|| auth_from_config(&self.state));
        ProvisionPipeline::new(self.state.clone())
            .run(node_id, auth, cancel)
            .await
    }

    /// Runs the vendor uninstall if present, removes local cluster state
    /// and marks the node `removed`. With `force`, residual uninstall
    /// errors are swallowed.
    pub async fn remove_node(&self, node_id: i64, force: bool) -> Result<(), ColdStoreError> {
        let _guard = self.state.try_node_lock(node_id)?;
        let node = self.store.get(node_id).await?;
        let auth = auth_from_config(&self.state);
        let target = target_for(&node, &self.state.config.ssh.user);
        let cancel = CancellationToken::new();

        let script = "\
for s in /usr/local/bin/k3s-uninstall.sh /usr/local/bin/k3s-agent-uninstall.sh; do \
  [ -x \"$s\" ] && \"$s\"; done; \
rm -rf /etc/rancher/k3s /var/lib/rancher/k3s; true";

        let result = self
            .state
            .shell
            .execute_script(&target, &auth, script, OP_TIMEOUT, &cancel)
            .await
            .and_then(|output| output.into_result().map(|_| ()));

        match result {
            Ok(()) => {}
            Err(e) if force => {
                warn!(node = node_id, error = %e, "ignoring uninstall failure (force)");
            }
            Err(e) => return Err(e),
        }

        self.store.mark_removed(node_id).await?;
        info!(node = node_id, "node removed from cluster");
        Ok(())
    }

    pub async fn drain(&self, node_id: i64) -> Result<String, ColdStoreError> {
        let hostname = self.node_hostname(node_id).await?;
        self.control_plane_exec(&format!(
            "k3s kubectl drain {} --ignore-daemonsets --delete-emptydir-data --force --timeout=120s",
            shell_quote(&hostname)
        ))
        .await
    }

    pub async fn cordon(&self, node_id: i64) -> Result<String, ColdStoreError> {
        let hostname = self.node_hostname(node_id).await?;
        self.control_plane_exec(&format!("k3s kubectl cordon {}", shell_quote(&hostname)))
            .await
    }

    pub async fn uncordon(&self, node_id: i64) -> Result<String, ColdStoreError> {
        let hostname = self.node_hostname(node_id).await?;
        self.control_plane_exec(&format!("k3s kubectl uncordon {}", shell_quote(&hostname)))
            .await
    }

    /// Issues a detached reboot. The SSH session dropping mid-command is
    /// expected and is not an error.
    pub async fn reboot(&self, node_id: i64) -> Result<(), ColdStoreError> {
        let node = self.store.get(node_id).await?;
        let auth = auth_from_config(&self.state);
        let target = target_for(&node, &self.state.config.ssh.user);
        let cancel = CancellationToken::new();
        let result = self
            .state
            .shell
            .execute(
                &target,
                &auth,
                "nohup sh -c 'sleep 1; reboot' >/dev/null 2>&1 &",
                Duration::from_secs(10),
                &cancel,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // The host going down mid-session is the success path here.
            Err(ColdStoreError::Io(_)) | Err(ColdStoreError::Timeout(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Tails the system journal on a node.
    pub async fn get_logs(&self, node_id: i64, lines: u32) -> Result<String, ColdStoreError> {
        let node = self.store.get(node_id).await?;
        let auth = auth_from_config(&self.state);
        let target = target_for(&node, &self.state.config.ssh.user);
        let cancel = CancellationToken::new();
        let lines = lines.clamp(1, 5000);
        let output = self
            .state
            .shell
            .execute(
                &target,
                &auth,
                &format!("journalctl -n {lines} --no-pager"),
                Duration::from_secs(30),
                &cancel,
            )
            .await?
            .into_result()?;
        self.store.touch_last_seen(node_id).await?;
        Ok(output.stdout)
    }

    /// Reads the join token file from the control-plane node.
    pub async fn get_cluster_token(&self) -> Result<String, ColdStoreError> {
        let output = self
            .control_plane_exec("cat /var/lib/rancher/k3s/server/node-token")
            .await?;
        Ok(output.trim().to_string())
    }

    async fn node_hostname(&self, node_id: i64) -> Result<String, ColdStoreError> {
        let node = self.store.get(node_id).await?;
        Ok(node
            .hostname
            .unwrap_or_else(|| derive_hostname(&node.address)))
    }

    async fn control_plane_exec(&self, command: &str) -> Result<String, ColdStoreError> {
        let cp = self.store.control_plane().await?;
        let auth = auth_from_config(&self.state);
        let target = control_plane_target(&cp, &self.state.config.ssh.user);
        let cancel = CancellationToken::new();
        let output = self
            .state
            .shell
            .execute(&target, &auth, command, OP_TIMEOUT, &cancel)
            .await?
            .into_result()?;
        Ok(output.stdout)
    }
}

fn control_plane_target(node: &Node, default_user: &str) -> RemoteTarget {
    target_for(node, default_user)
}
