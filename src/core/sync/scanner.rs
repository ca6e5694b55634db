// src/core/sync/scanner.rs

//! Per-pool filesystem scanner. Each pool has its own cadence; the
//! `is_scanning` flag keeps concurrent scans of one pool out of each
//! other's way, and is released even when a scan errors.

use super::store::SyncStore;
use super::{pool_object_key, should_skip_dir, should_skip_file};
use crate::config::PoolConfig;
use crate::core::errors::ColdStoreError;
use crate::core::metrics;
use crate::core::state::AppState;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct PoolScanner {
    state: Arc<AppState>,
    store: SyncStore,
    pool: PoolConfig,
}

#[derive(Debug, Default)]
struct ScanTally {
    found: i64,
    enqueued: i64,
}

impl PoolScanner {
    pub fn new(state: Arc<AppState>, pool: PoolConfig) -> Self {
        let store = SyncStore::new(state.db.clone());
        Self { state, store, pool }
    }

    /// Runs the scan loop until shutdown. The first scan happens one
    /// interval after startup so boot is not dominated by tree walks.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            pool = %self.pool.name,
            interval = ?self.pool.scan_interval,
            "pool scanner started"
        );
        let mut interval = tokio::time::interval(self.pool.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would scan during startup.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan_once().await {
                        warn!(pool = %self.pool.name, error = %e, "pool scan failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(pool = %self.pool.name, "pool scanner shutting down");
                    return;
                }
            }
        }
    }

    /// One scan pass: claim the flag, walk the tree, upsert queue rows,
    /// record the result. The flag is released on every exit path.
    pub async fn scan_once(&self) -> Result<(), ColdStoreError> {
        if !self.store.try_begin_scan(&self.pool.name).await? {
            debug!(pool = %self.pool.name, "scan already in progress, skipping");
            return Ok(());
        }

        let started = Instant::now();
        let mut tally = ScanTally::default();
        let result = self.walk(&mut tally).await;

        self.store
            .finish_scan(
                &self.pool.name,
                tally.found,
                tally.enqueued,
                started.elapsed(),
            )
            .await?;

        match &result {
            Ok(()) => info!(
                pool = %self.pool.name,
                found = tally.found,
                enqueued = tally.enqueued,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pool scan complete"
            ),
            Err(e) => warn!(pool = %self.pool.name, error = %e, "pool scan aborted"),
        }
        result
    }

    async fn walk(&self, tally: &mut ScanTally) -> Result<(), ColdStoreError> {
        let root = PathBuf::from(&self.pool.root);
        let mut stack = vec![root.clone()];

        while let Some(dir) = stack.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let metadata = entry.metadata().await?;

                if metadata.is_dir() {
                    if !should_skip_dir(&name) {
                        stack.push(entry.path());
                    }
                    continue;
                }
                if should_skip_file(&name) {
                    continue;
                }

                tally.found += 1;
                metrics::SCANNER_FILES_FOUND_TOTAL.inc();

                let path = entry.path();
                let relative = path
                    .strip_prefix(&root)
                    .map_err(|_| {
                        ColdStoreError::Internal(format!(
                            "scanned path {} escapes pool root",
                            path.display()
                        ))
                    })?
                    .to_string_lossy()
                    .replace('\\', "/");
                let object_key = pool_object_key(&self.pool.name, &relative);
                let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

                let enqueued = self
                    .store
                    .upsert_pool_file(
                        &self.pool.name,
                        &relative,
                        &path.to_string_lossy(),
                        &object_key,
                        metadata.len() as i64,
                        modified,
                        self.state.config.media.max_retries,
                    )
                    .await?;
                if enqueued {
                    tally.enqueued += 1;
                }
            }
        }
        Ok(())
    }
}
