// src/core/cluster/store.rs

//! Node inventory and provisioning-log persistence. All writes to
//! `cluster_nodes` and `provision_step_logs` go through here.

use super::{Node, NodeRole, NodeStatus, ProvisionStepLog, StepStatus};
use crate::core::errors::ColdStoreError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;

const NODE_COLUMNS: &str = "id, address, hostname, role, status, shell_user, shell_port, \
     os_info, last_seen_at, provisioned_at, error_message, created_at, updated_at";

fn node_from_row(row: &PgRow) -> Result<Node, ColdStoreError> {
    let role_text: String = row.try_get("role")?;
    let status_text: String = row.try_get("status")?;
    Ok(Node {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        hostname: row.try_get("hostname")?,
        role: NodeRole::from_str(&role_text)
            .map_err(|_| ColdStoreError::Internal(format!("bad node role '{role_text}'")))?,
        status: NodeStatus::from_str(&status_text)
            .map_err(|_| ColdStoreError::Internal(format!("bad node status '{status_text}'")))?,
        shell_user: row.try_get("shell_user")?,
        shell_port: row.try_get("shell_port")?,
        os_info: row.try_get("os_info")?,
        last_seen_at: row.try_get("last_seen_at")?,
        provisioned_at: row.try_get("provisioned_at")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone)]
pub struct NodeStore {
    pool: PgPool,
}

impl NodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        address: &str,
        hostname: Option<&str>,
        role: NodeRole,
        shell_user: Option<&str>,
        shell_port: u16,
    ) -> Result<Node, ColdStoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO cluster_nodes (address, hostname, role, status, shell_user, shell_port) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {NODE_COLUMNS}"
        ))
        .bind(address)
        .bind(hostname)
        .bind(role.to_string())
        .bind(NodeStatus::Pending.to_string())
        .bind(shell_user)
        .bind(shell_port as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return ColdStoreError::Validation(format!(
                        "a node with address '{address}' already exists"
                    ));
                }
            }
            e.into()
        })?;
        node_from_row(&row)
    }

    pub async fn get(&self, id: i64) -> Result<Node, ColdStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM cluster_nodes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ColdStoreError::NotFound(format!("node {id}")))?;
        node_from_row(&row)
    }

    pub async fn list(&self) -> Result<Vec<Node>, ColdStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM cluster_nodes ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(node_from_row).collect()
    }

    /// Nodes a deployment fans out to: everything not failed or removed.
    pub async fn list_active(&self) -> Result<Vec<Node>, ColdStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM cluster_nodes \
             WHERE status NOT IN ('failed', 'removed') ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(node_from_row).collect()
    }

    /// The node workload updates are issued from: the first node carrying
    /// the control-plane role.
    pub async fn control_plane(&self) -> Result<Node, ColdStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM cluster_nodes \
             WHERE role = 'control-plane' AND status <> 'removed' ORDER BY id LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ColdStoreError::NotFound("control-plane node".to_string()))?;
        node_from_row(&row)
    }

    /// Guarded state transition: succeeds only when the node is still in
    /// `from`, so each state allows at most one transition per request.
    pub async fn transition(
        &self,
        id: i64,
        from: NodeStatus,
        to: NodeStatus,
    ) -> Result<(), ColdStoreError> {
        if !from.can_transition_to(to) {
            return Err(ColdStoreError::Validation(format!(
                "node cannot move from {from} to {to}"
            )));
        }
        let result = sqlx::query(
            "UPDATE cluster_nodes SET status = $3, updated_at = now() \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ColdStoreError::Busy(format!("node {id}")));
        }
        Ok(())
    }

    /// Unconditional move to `failed` with a message.
    pub async fn mark_failed(&self, id: i64, message: &str) -> Result<(), ColdStoreError> {
        sqlx::query(
            "UPDATE cluster_nodes SET status = 'failed', error_message = $2, updated_at = now() \
             WHERE id = $1 AND status <> 'removed'",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_removed(&self, id: i64) -> Result<(), ColdStoreError> {
        sqlx::query(
            "UPDATE cluster_nodes SET status = 'removed', updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_ready(&self, id: i64) -> Result<(), ColdStoreError> {
        self.transition(id, NodeStatus::Joining, NodeStatus::Ready)
            .await?;
        sqlx::query(
            "UPDATE cluster_nodes SET provisioned_at = now(), error_message = NULL, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_hostname(&self, id: i64, hostname: &str) -> Result<(), ColdStoreError> {
        sqlx::query("UPDATE cluster_nodes SET hostname = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(hostname)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_os_info(&self, id: i64, os_info: &str) -> Result<(), ColdStoreError> {
        sqlx::query(
            "UPDATE cluster_nodes SET os_info = $2, last_seen_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(os_info)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_last_seen(&self, id: i64) -> Result<(), ColdStoreError> {
        sqlx::query("UPDATE cluster_nodes SET last_seen_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Provision step logs (append-only) ---

    pub async fn start_step(&self, node_id: i64, step: &str) -> Result<i64, ColdStoreError> {
        let row = sqlx::query(
            "INSERT INTO provision_step_logs (node_id, step, status) \
             VALUES ($1, $2, 'running') RETURNING id",
        )
        .bind(node_id)
        .bind(step)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    pub async fn finish_step(
        &self,
        step_id: i64,
        status: StepStatus,
        message: &str,
        output: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "UPDATE provision_step_logs SET status = $2, message = $3, output = $4, \
             finished_at = now() WHERE id = $1",
        )
        .bind(step_id)
        .bind(status.to_string())
        .bind(message)
        .bind(output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn step_logs(&self, node_id: i64) -> Result<Vec<ProvisionStepLog>, ColdStoreError> {
        let rows = sqlx::query(
            "SELECT id, node_id, step, status, message, output, started_at, finished_at \
             FROM provision_step_logs WHERE node_id = $1 ORDER BY started_at, id",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let status_text: String = row.try_get("status")?;
                Ok(ProvisionStepLog {
                    id: row.try_get("id")?,
                    node_id: row.try_get("node_id")?,
                    step: row.try_get("step")?,
                    status: StepStatus::from_str(&status_text).map_err(|_| {
                        ColdStoreError::Internal(format!("bad step status '{status_text}'"))
                    })?,
                    message: row.try_get("message")?,
                    output: row.try_get("output")?,
                    started_at: row.try_get("started_at")?,
                    finished_at: row.try_get("finished_at")?,
                })
            })
            .collect()
    }

    /// Appends a failure excerpt for a fan-out target, used by the
    /// deployment distribute step.
    pub async fn log_step_failure(
        &self,
        node_id: i64,
        step: &str,
        message: &str,
        excerpt: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "INSERT INTO provision_step_logs (node_id, step, status, message, output, finished_at) \
             VALUES ($1, $2, 'failed', $3, $4, now())",
        )
        .bind(node_id)
        .bind(step)
        .bind(message)
        .bind(excerpt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

}
