// src/server/routes/sync.rs

//! Sync engine endpoints: queue overview, failure retry, and bulk restore.

use super::ApiError;
use crate::core::state::AppState;
use crate::core::sync::restore::{BulkRestoreSummary, BulkRestorer};
use crate::core::sync::store::SyncStore;
use crate::core::sync::{QueueItem, QueueKind};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/overview", get(overview))
        .route("/sync/retry-failed", post(retry_failed))
        .route("/sync/failed", get(failed))
        .route("/sync/bulk-restore", post(bulk_restore))
}

async fn overview(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let store = SyncStore::new(state.db.clone());
    let media = store.stats(QueueKind::Media).await?;
    let pool = store.stats(QueueKind::Pool).await?;
    Ok(Json(json!({
        "media": media,
        "pool": pool,
        "workers": state.config.media.workers,
        "primary_configured": state.media_primary.is_some(),
        "mirror_configured": state.media_mirror.is_some(),
    })))
}

async fn retry_failed(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let store = SyncStore::new(state.db.clone());
    let rearmed = store.retry_failed().await?;
    Ok(Json(json!({ "rearmed": rearmed })))
}

async fn failed(State(state): State<Arc<AppState>>) -> Result<Json<Vec<QueueItem>>, ApiError> {
    let store = SyncStore::new(state.db.clone());
    Ok(Json(store.failed_items(200).await?))
}

async fn bulk_restore(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BulkRestoreSummary>, ApiError> {
    let restorer = BulkRestorer::new(state);
    Ok(Json(restorer.run().await?))
}
