// src/server/routes/cluster.rs

//! Node inventory and lifecycle endpoints.

use super::{ApiError, AuthUser};
use crate::core::cluster::ops::ClusterOps;
use crate::core::cluster::provision::ProvisionPipeline;
use crate::core::cluster::{Node, NodeRole, ProvisionStepLog};
use crate::core::errors::ColdStoreError;
use crate::core::remote::RemoteAuth;
use crate::core::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cluster/nodes", post(add_node).get(list_nodes))
        .route("/cluster/nodes/{id}", get(get_node).delete(remove_node))
        .route("/cluster/nodes/{id}/{action}", post(node_action))
        .route("/cluster/nodes/{id}/logs", get(node_logs))
        .route("/cluster/nodes/{id}/steps", get(node_steps))
        .route("/cluster/token", get(cluster_token))
}

#[derive(Deserialize)]
struct AddNodeRequest {
    address: String,
    #[serde(default)]
    hostname: Option<String>,
    role: NodeRole,
    #[serde(default)]
    auto_setup: bool,
    #[serde(default)]
    key_path: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl AddNodeRequest {
    fn auth(&self) -> Option<RemoteAuth> {
        if self.key_path.is_none() && self.password.is_none() {
            return None;
        }
        Some(RemoteAuth {
            key_path: self.key_path.clone(),
            password: self.password.clone(),
        })
    }
}

async fn add_node(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddNodeRequest>,
) -> Result<Json<Node>, ApiError> {
    let ops = ClusterOps::new(state);
    let node = ops
        .add_node(
            &request.address,
            request.hostname.as_deref(),
            request.role,
            request.auth(),
            request.auto_setup,
        )
        .await?;
    Ok(Json(node))
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Node>>, ApiError> {
    let ops = ClusterOps::new(state);
    Ok(Json(ops.store().list().await?))
}

async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Node>, ApiError> {
    let ops = ClusterOps::new(state);
    Ok(Json(ops.store().get(id).await?))
}

#[derive(Deserialize)]
struct RemoveQuery {
    #[serde(default)]
    force: bool,
}

async fn remove_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<Value>, ApiError> {
    let ops = ClusterOps::new(state);
    ops.remove_node(id, query.force).await?;
    Ok(Json(json!({ "removed": id })))
}

#[derive(Deserialize)]
struct ActionBody {
    #[serde(default)]
    key_path: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

async fn node_action(
    State(state): State<Arc<AppState>>,
    Path((id, action)): Path<(i64, String)>,
    Extension(user): Extension<AuthUser>,
    body: Option<Json<ActionBody>>,
) -> Result<Json<Value>, ApiError> {
    let ops = ClusterOps::new(state.clone());
    match action.as_str() {
        "provision" => {
            // Claim the per-node lock here so a concurrent request fails
            // with a busy error before anything is scheduled. The guard
            // moves into the pipeline task and is held for its whole run.
            let guard = state.try_node_lock(id)?;
            let auth = body.and_then(|Json(body)| {
                if body.key_path.is_none() && body.password.is_none() {
                    None
                } else {
                    Some(RemoteAuth {
                        key_path: body.key_path,
                        password: body.password,
                    })
                }
            });
            // The pipeline is long-running; it reports through the step log
            // and the node:{id} progress topic.
            let pipeline_state = state.clone();
            tokio::spawn(async move {
                let pipeline = ProvisionPipeline::new(pipeline_state);
                let auth = auth.unwrap_or_else(|| {
                    crate::core::cluster::ops::auth_from_config(&state)
                });
                if let Err(e) = pipeline
                    .run_locked(guard, id, auth, CancellationToken::new())
                    .await
                {
                    warn!(node = id, user = %user.user_id, error = %e, "provisioning failed");
                }
            });
            Ok(Json(json!({ "scheduled": "provision", "node": id })))
        }
        "reboot" => {
            ops.reboot(id).await?;
            Ok(Json(json!({ "rebooted": id })))
        }
        "drain" => {
            let output = ops.drain(id).await?;
            Ok(Json(json!({ "drained": id, "output": output })))
        }
        "cordon" => {
            let output = ops.cordon(id).await?;
            Ok(Json(json!({ "cordoned": id, "output": output })))
        }
        "uncordon" => {
            let output = ops.uncordon(id).await?;
            Ok(Json(json!({ "uncordoned": id, "output": output })))
        }
        other => Err(ColdStoreError::Validation(format!("unknown node action '{other}'")).into()),
    }
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_lines")]
    lines: u32,
}

fn default_lines() -> u32 {
    200
}

async fn node_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let ops = ClusterOps::new(state);
    let logs = ops.get_logs(id, query.lines).await?;
    Ok(Json(json!({ "node": id, "lines": query.lines, "logs": logs })))
}

async fn node_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ProvisionStepLog>>, ApiError> {
    let ops = ClusterOps::new(state);
    Ok(Json(ops.store().step_logs(id).await?))
}

async fn cluster_token(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let ops = ClusterOps::new(state);
    let token = ops.get_cluster_token().await?;
    Ok(Json(json!({ "join_token": token })))
}
