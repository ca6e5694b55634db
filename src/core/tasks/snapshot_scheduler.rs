// src/core/tasks/snapshot_scheduler.rs

//! Periodically consults the snapshot decider for each class and takes a
//! snapshot when the database changed since the previous one. Season
//! cleanup runs after every successful cloud snapshot.

use crate::core::snapshot::{SnapshotClass, Snapshotter};
use crate::core::state::AppState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct SnapshotScheduler {
    state: Arc<AppState>,
}

impl SnapshotScheduler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let local_interval = self.state.config.snapshot.local_interval;
        let cloud_interval = self.state.config.snapshot.cloud_interval;
        info!(
            local = ?local_interval,
            cloud = ?cloud_interval,
            "snapshot scheduler started"
        );

        let mut local_tick = tokio::time::interval(local_interval);
        let mut cloud_tick = tokio::time::interval(cloud_interval);
        local_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        cloud_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the immediate first ticks; snapshots start one interval in.
        local_tick.tick().await;
        cloud_tick.tick().await;

        loop {
            tokio::select! {
                _ = local_tick.tick() => {
                    self.snapshot_if_required(SnapshotClass::Local).await;
                    // With no cloud backend the local tick owns the season
                    // rollover.
                    if self.state.snapshot_cloud.is_none() {
                        self.cleanup().await;
                    }
                }
                _ = cloud_tick.tick() => {
                    if self.state.snapshot_cloud.is_some() {
                        self.snapshot_if_required(SnapshotClass::Cloud).await;
                        self.cleanup().await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("snapshot scheduler shutting down");
                    return;
                }
            }
        }
    }

    async fn snapshot_if_required(&self, class: SnapshotClass) {
        let snapshotter = Snapshotter::new(self.state.clone());
        if !snapshotter.decider().is_snapshot_required(class).await {
            debug!(class = %class, "database unchanged, skipping snapshot");
            return;
        }
        match snapshotter.take(class).await {
            Ok(key) => info!(class = %class, key = %key, "scheduled snapshot taken"),
            Err(e) => warn!(class = %class, error = %e, "scheduled snapshot failed"),
        }
    }

    async fn cleanup(&self) {
        let snapshotter = Snapshotter::new(self.state.clone());
        if let Err(e) = snapshotter.cleanup_seasons().await {
            warn!(error = %e, "season cleanup failed");
        }
    }
}
