// src/server/routes/restore.rs

//! Two-step confirmed restore endpoints, for both the cloud and the
//! local snapshot stores.

use super::{ApiError, AuthUser};
use crate::core::restore::{
    RestoreDateSummary, RestoreOutcome, RestorePreview, RestoreService, SnapshotEntry,
};
use crate::core::snapshot::SnapshotClass;
use crate::core::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/restore/dates", get(list_dates))
        .route("/restore/dates/{date}", get(list_for_date))
        .route("/restore/closest", get(closest))
        .route("/restore/preview", post(preview_cloud))
        .route("/restore/execute", post(execute_cloud))
        .route("/restore/local", get(list_local))
        .route("/restore/local/preview", post(preview_local))
        .route("/restore/local/execute", post(execute_local))
}

async fn list_dates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RestoreDateSummary>>, ApiError> {
    let service = RestoreService::new(state);
    Ok(Json(service.list_available_dates().await?))
}

async fn list_for_date(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<Vec<SnapshotEntry>>, ApiError> {
    let service = RestoreService::new(state);
    Ok(Json(service.list_snapshots_for_date(date).await?))
}

#[derive(Deserialize)]
struct ClosestQuery {
    /// Target time as `YYYY-MM-DDTHH:MM:SS`.
    target: NaiveDateTime,
}

async fn closest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClosestQuery>,
) -> Result<Json<Option<SnapshotEntry>>, ApiError> {
    let service = RestoreService::new(state);
    Ok(Json(service.find_closest_snapshot(query.target).await?))
}

#[derive(Deserialize)]
struct PreviewRequest {
    snapshot_key: String,
}

#[derive(Deserialize)]
struct ExecuteRequest {
    snapshot_key: String,
    confirmation_token: String,
}

async fn preview_cloud(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<RestorePreview>, ApiError> {
    preview(state, user, request, SnapshotClass::Cloud).await
}

async fn preview_local(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<PreviewRequest>,
) -> Result<Json<RestorePreview>, ApiError> {
    preview(state, user, request, SnapshotClass::Local).await
}

async fn preview(
    state: Arc<AppState>,
    user: AuthUser,
    request: PreviewRequest,
    source: SnapshotClass,
) -> Result<Json<RestorePreview>, ApiError> {
    let service = RestoreService::new(state);
    let preview = service
        .preview(&request.snapshot_key, source, &user.user_id)
        .await?;
    Ok(Json(preview))
}

async fn execute_cloud(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<RestoreOutcome>, ApiError> {
    execute(state, user, request, SnapshotClass::Cloud).await
}

async fn execute_local(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<RestoreOutcome>, ApiError> {
    execute(state, user, request, SnapshotClass::Local).await
}

async fn execute(
    state: Arc<AppState>,
    user: AuthUser,
    request: ExecuteRequest,
    source: SnapshotClass,
) -> Result<Json<RestoreOutcome>, ApiError> {
    let service = RestoreService::new(state);
    let outcome = service
        .execute(
            &request.snapshot_key,
            &request.confirmation_token,
            source,
            &user.user_id,
        )
        .await?;
    Ok(Json(outcome))
}

/// The local store listing mirrors the cloud date view but only reads
/// from disk.
async fn list_local(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SnapshotEntry>>, ApiError> {
    use crate::core::snapshot::parse_snapshot_timestamp;
    use crate::core::storage::ObjectStore;

    let base = state.config.snapshot.base_prefix.clone();
    let mut entries: Vec<SnapshotEntry> = state
        .snapshot_local
        .list_recursive(&format!("{base}/"))
        .await
        .map_err(ApiError::from)?
        .into_iter()
        .filter_map(|object| {
            parse_snapshot_timestamp(&object.key).map(|timestamp| SnapshotEntry {
                key: object.key,
                source: SnapshotClass::Local,
                timestamp,
                size: object.size,
            })
        })
        .collect();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(Json(entries))
}
