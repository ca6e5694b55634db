// src/core/deploy/store.rs

//! Persistence for deployment configs and history rows.

use super::{DeployStatus, DeploymentConfig, DeploymentHistory};
use crate::core::errors::ColdStoreError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;

const CONFIG_COLUMNS: &str = "id, name, image_repo, current_version, workload_name, namespace, \
     replicas, build_context, docker_file";

const HISTORY_COLUMNS: &str = "id, deployment_id, version, previous_version, deployed_by, status, \
     build_output, deploy_output, error_message, started_at, completed_at";

fn config_from_row(row: &PgRow) -> Result<DeploymentConfig, ColdStoreError> {
    Ok(DeploymentConfig {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        image_repo: row.try_get("image_repo")?,
        current_version: row.try_get("current_version")?,
        workload_name: row.try_get("workload_name")?,
        namespace: row.try_get("namespace")?,
        replicas: row.try_get("replicas")?,
        build_context: row.try_get("build_context")?,
        docker_file: row.try_get("docker_file")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<DeploymentHistory, ColdStoreError> {
    let status_text: String = row.try_get("status")?;
    Ok(DeploymentHistory {
        id: row.try_get("id")?,
        deployment_id: row.try_get("deployment_id")?,
        version: row.try_get("version")?,
        previous_version: row.try_get("previous_version")?,
        deployed_by: row.try_get("deployed_by")?,
        status: DeployStatus::from_str(&status_text)
            .map_err(|_| ColdStoreError::Internal(format!("bad deploy status '{status_text}'")))?,
        build_output: row.try_get("build_output")?,
        deploy_output: row.try_get("deploy_output")?,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[derive(Clone)]
pub struct DeployStore {
    pool: PgPool,
}

impl DeployStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_config(&self, id: i64) -> Result<DeploymentConfig, ColdStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM deployment_configs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ColdStoreError::NotFound(format!("deployment config {id}")))?;
        config_from_row(&row)
    }

    pub async fn list_configs(&self) -> Result<Vec<DeploymentConfig>, ColdStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM deployment_configs ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(config_from_row).collect()
    }

    pub async fn set_current_version(
        &self,
        config_id: i64,
        version: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query("UPDATE deployment_configs SET current_version = $2 WHERE id = $1")
            .bind(config_id)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_history(
        &self,
        config_id: i64,
        version: &str,
        previous_version: Option<&str>,
        deployed_by: &str,
    ) -> Result<DeploymentHistory, ColdStoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO deployment_history \
             (deployment_id, version, previous_version, deployed_by, status) \
             VALUES ($1, $2, $3, $4, 'pending') RETURNING {HISTORY_COLUMNS}"
        ))
        .bind(config_id)
        .bind(version)
        .bind(previous_version)
        .bind(deployed_by)
        .fetch_one(&self.pool)
        .await?;
        history_from_row(&row)
    }

    pub async fn get_history(&self, id: i64) -> Result<DeploymentHistory, ColdStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM deployment_history WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ColdStoreError::NotFound(format!("deployment history {id}")))?;
        history_from_row(&row)
    }

    pub async fn history_for_config(
        &self,
        config_id: i64,
        limit: i64,
    ) -> Result<Vec<DeploymentHistory>, ColdStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM deployment_history \
             WHERE deployment_id = $1 ORDER BY started_at DESC, id DESC LIMIT $2"
        ))
        .bind(config_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(history_from_row).collect()
    }

    /// Most recent successful deployment for a config, if any.
    pub async fn latest_success(
        &self,
        config_id: i64,
    ) -> Result<Option<DeploymentHistory>, ColdStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM deployment_history \
             WHERE deployment_id = $1 AND status = 'success' \
             ORDER BY started_at DESC, id DESC LIMIT 1"
        ))
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(history_from_row).transpose()
    }

    pub async fn set_status(
        &self,
        history_id: i64,
        status: DeployStatus,
    ) -> Result<(), ColdStoreError> {
        sqlx::query("UPDATE deployment_history SET status = $2 WHERE id = $1")
            .bind(history_id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn append_build_output(
        &self,
        history_id: i64,
        output: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query("UPDATE deployment_history SET build_output = build_output || $2 WHERE id = $1")
            .bind(history_id)
            .bind(output)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn append_deploy_output(
        &self,
        history_id: i64,
        output: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "UPDATE deployment_history SET deploy_output = deploy_output || $2 WHERE id = $1",
        )
        .bind(history_id)
        .bind(output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete(
        &self,
        history_id: i64,
        status: DeployStatus,
        error_message: Option<&str>,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "UPDATE deployment_history SET status = $2, error_message = $3, completed_at = now() \
             WHERE id = $1",
        )
        .bind(history_id)
        .bind(status.to_string())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
