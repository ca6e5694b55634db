// src/server/routes/mod.rs

//! The control-plane HTTP API: route assembly, bearer-token auth, the
//! request log, and the error-to-status mapping.

use crate::core::errors::{ColdStoreError, ErrorKind};
use crate::core::state::{ApiLogEntry, AppState};
use crate::core::validation::mask_secret;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::error;

mod cluster;
mod deploy;
mod restore;
mod sync;

/// The authenticated caller, attached to the request by the auth layer.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    // Layer order: the auth layer is outermost so the request log sees
    // the resolved user.
    let api = Router::new()
        .merge(cluster::router())
        .merge(deploy::router())
        .merge(restore::router())
        .merge(sync::router())
        .route("/system/config", get(system_config))
        .route("/system/logs", get(system_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_log_layer,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(api)
        .with_state(state)
}

/// Resolves the bearer token to a user. An empty token table disables
/// authentication for bootstrap installs.
async fn auth_layer(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let tokens = &state.config.api.tokens;
    let user = if tokens.is_empty() {
        AuthUser {
            user_id: "operator".to_string(),
            role: "operator".to_string(),
        }
    } else {
        let bearer = request
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match bearer.and_then(|token| tokens.iter().find(|t| t.token == token)) {
            Some(token) => AuthUser {
                user_id: token.user_id.clone(),
                role: token.role.clone(),
            },
            None => return ApiError(ColdStoreError::AuthRequired).into_response(),
        }
    };
    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Appends every request to the capped in-memory log buffer.
async fn request_log_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let user_id = request
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.user_id.clone());
    let response = next.run(request).await;
    state.api_log.push(ApiLogEntry {
        at: Utc::now(),
        method,
        path,
        status: response.status().as_u16(),
        user_id,
    });
    response
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map_err(ColdStoreError::from)?;
    Ok(Json(json!({ "status": "ok" })))
}

/// The active configuration with every secret masked to `first5…last5`.
async fn system_config(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let mut value = serde_json::to_value(state.config.as_ref()).map_err(ColdStoreError::from)?;
    mask_path(&mut value, &["database", "password"]);
    mask_path(&mut value, &["ssh", "password"]);
    mask_path(&mut value, &["cluster", "join_token"]);
    mask_path(&mut value, &["snapshot", "s3", "secret_key"]);
    mask_path(&mut value, &["snapshot", "s3", "access_key"]);
    for backend in ["primary", "mirror"] {
        mask_path(&mut value, &["media", backend, "secret_key"]);
        mask_path(&mut value, &["media", backend, "access_key"]);
    }
    if let Some(tokens) = value
        .pointer_mut("/api/tokens")
        .and_then(Value::as_array_mut)
    {
        for token in tokens {
            if let Some(secret) = token.get_mut("token") {
                if let Some(text) = secret.as_str() {
                    *secret = Value::String(mask_secret(text));
                }
            }
        }
    }
    Ok(Json(value))
}

async fn system_logs(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "entries": state.api_log.snapshot() }))
}

fn mask_path(value: &mut Value, path: &[&str]) {
    let mut cursor = value;
    for segment in &path[..path.len() - 1] {
        match cursor.get_mut(segment) {
            Some(next) => cursor = next,
            None => return,
        }
    }
    if let Some(secret) = cursor.get_mut(path[path.len() - 1]) {
        if let Some(text) = secret.as_str() {
            *secret = Value::String(mask_secret(text));
        }
    }
}

/// Wrapper mapping [`ColdStoreError`] onto HTTP responses. Unknown errors
/// are logged and surfaced as a generic message.
pub struct ApiError(pub ColdStoreError);

impl From<ColdStoreError> for ApiError {
    fn from(e: ColdStoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let kind = error.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Auth => match &error {
                ColdStoreError::Forbidden(_) => StatusCode::FORBIDDEN,
                _ => StatusCode::UNAUTHORIZED,
            },
            ErrorKind::Busy => StatusCode::CONFLICT,
            ErrorKind::TransientRemote | ErrorKind::PartialFanout => StatusCode::BAD_GATEWAY,
            ErrorKind::DestructiveFailure | ErrorKind::Cancelled | ErrorKind::Unknown => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match &error {
            // The recovery path must reach the operator.
            ColdStoreError::RestoreFailed {
                message,
                pre_restore_key,
            } => json!({
                "error": message,
                "kind": "destructive-failure",
                "pre_restore_key": pre_restore_key,
                "recovery": "restore the pre-restore snapshot to roll the database back",
            }),
            other if kind == ErrorKind::Unknown => {
                error!(error = %other, "unclassified error reached the API layer");
                json!({ "error": "internal server error", "kind": "unknown" })
            }
            other => json!({ "error": other.to_string(), "kind": format!("{kind:?}") }),
        };
        (status, Json(body)).into_response()
    }
}
