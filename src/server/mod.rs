// src/server/mod.rs

use crate::config::Config;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

mod context;
mod initialization;
mod metrics_server;
pub mod routes;
mod spawner;

/// How long shutdown waits for in-flight background work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(20);

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize shared state: pool, migrations, backends, inventory.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Serve the control-plane API until a shutdown signal arrives.
    let addr = format!(
        "{}:{}",
        server_context.state.config.host, server_context.state.config.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind API listener on {addr}"))?;
    info!("coldstored API listening on http://{addr}");

    let app = routes::router(server_context.state.clone());
    let shutdown_tx = server_context.shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("API server error")?;

    // 4. Stop background workers and await in-flight operations.
    let _ = shutdown_tx.send(());
    let drain = async {
        while let Some(result) = server_context.background_tasks.join_next().await {
            if let Err(e) = result {
                warn!("background task ended abnormally: {e}");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("background tasks did not drain within the grace period");
    }
    info!("shutdown complete");
    Ok(())
}
