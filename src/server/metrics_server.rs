// src/server/metrics_server.rs

use crate::core::metrics::encode_metrics;
use crate::core::state::AppState;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Serves one scrape. Gauges that mirror database state are refreshed
/// before encoding.
async fn metrics_handler(state: Arc<AppState>) -> impl IntoResponse {
    if let Ok(row) =
        sqlx::query_as::<_, (i64,)>("SELECT count(*) FROM cluster_nodes WHERE status = 'ready'")
            .fetch_one(&state.db)
            .await
    {
        crate::core::metrics::NODES_READY.set(row.0 as f64);
    }

    let body = encode_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a simple HTTP server to expose Prometheus metrics on /metrics.
pub async fn run_metrics_server(state: Arc<AppState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = state.config.metrics.port;
    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("serving Prometheus metrics at http://{addr}/metrics");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("could not bind metrics listener on port {port}: {e}");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
    {
        error!("metrics server error: {e}");
    }
}
