// src/server/routes/deploy.rs

//! Deployment endpoints, including the SSE progress stream.

use super::{ApiError, AuthUser};
use crate::core::deploy::pipeline::DeployPipeline;
use crate::core::deploy::{DeployRequest, DeployStatus, DeploymentConfig, DeploymentHistory};
use crate::core::state::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::Stream;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deploy/configs", get(list_configs))
        .route("/deploy/configs/{id}", get(get_config))
        .route("/deploy", post(start_deploy))
        .route("/deploy/history/{config_id}", get(history))
        .route("/deploy/rollback/{config_id}", post(rollback))
        .route("/deploy/cancel/{history_id}", post(cancel))
        .route("/deploy/status/{history_id}", get(status_stream))
}

async fn list_configs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeploymentConfig>>, ApiError> {
    let pipeline = DeployPipeline::new(state);
    Ok(Json(pipeline.store().list_configs().await?))
}

async fn get_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DeploymentConfig>, ApiError> {
    let pipeline = DeployPipeline::new(state);
    Ok(Json(pipeline.store().get_config(id).await?))
}

async fn start_deploy(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<DeploymentHistory>, ApiError> {
    let pipeline = DeployPipeline::new(state);
    let history = pipeline.start(request, &user.user_id).await?;
    Ok(Json(history))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(config_id): Path<i64>,
) -> Result<Json<Vec<DeploymentHistory>>, ApiError> {
    let pipeline = DeployPipeline::new(state);
    Ok(Json(pipeline.store().history_for_config(config_id, 50).await?))
}

#[derive(Deserialize, Default)]
struct RollbackRequest {
    #[serde(default)]
    targets: Vec<String>,
}

async fn rollback(
    State(state): State<Arc<AppState>>,
    Path(config_id): Path<i64>,
    body: Option<Json<RollbackRequest>>,
) -> Result<Json<Value>, ApiError> {
    let targets = body.map(|Json(b)| b.targets).unwrap_or_default();
    let pipeline = DeployPipeline::new(state);
    pipeline
        .rollback(config_id, &targets, &CancellationToken::new())
        .await?;
    Ok(Json(json!({ "rolled_back": config_id })))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(history_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let pipeline = DeployPipeline::new(state);
    pipeline.cancel(history_id)?;
    Ok(Json(json!({ "cancelled": history_id })))
}

/// Server-Sent Events of pipeline progress. Consumers that fall behind
/// lose old events rather than stalling the pipeline.
async fn status_stream(
    State(state): State<Arc<AppState>>,
    Path(history_id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let pipeline = DeployPipeline::new(state.clone());
    let history = pipeline.store().get_history(history_id).await?;
    let terminal = matches!(
        history.status,
        DeployStatus::Success | DeployStatus::Failed | DeployStatus::RolledBack
    );
    let mut receiver = state.progress.subscribe(&format!("deploy:{history_id}"));

    let stream = async_stream::stream! {
        if let Ok(event) = Event::default().event("history").json_data(&history) {
            yield Ok(event);
        }
        if terminal {
            return;
        }
        loop {
            match receiver.recv().await {
                Ok(progress) => {
                    if let Ok(event) = Event::default().event("progress").json_data(&progress) {
                        yield Ok(event);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
