// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::sync::scanner::PoolScanner;
use crate::core::sync::worker::UploadWorker;
use crate::core::tasks::snapshot_scheduler::SnapshotScheduler;
use crate::core::tasks::token_janitor::TokenJanitor;
use anyhow::Result;
use tracing::info;

/// Spawns all critical background tasks into the context's JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if state.config.metrics.enabled {
        let metrics_state = state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Snapshot scheduler ---
    let scheduler = SnapshotScheduler::new(state.clone());
    let shutdown_rx_snapshots = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        scheduler.run(shutdown_rx_snapshots).await;
        Ok(())
    });

    // --- Restore token janitor ---
    let janitor = TokenJanitor::new(state.clone());
    let shutdown_rx_janitor = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        janitor.run(shutdown_rx_janitor).await;
        Ok(())
    });

    // --- Pool scanners, one per configured pool ---
    for pool in &state.config.media.pools {
        let scanner = PoolScanner::new(state.clone(), pool.clone());
        let shutdown_rx_scan = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            scanner.run(shutdown_rx_scan).await;
            Ok(())
        });
    }

    // --- Upload workers ---
    for worker_id in 0..state.config.media.workers {
        let worker = UploadWorker::new(state.clone(), worker_id);
        let shutdown_rx_worker = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            worker.run(shutdown_rx_worker).await;
            Ok(())
        });
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
