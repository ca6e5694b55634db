// src/core/sync/worker.rs

//! Upload workers. Each worker loops on a fixed tick, atomically claims
//! one eligible queue row at a time, and uploads it to the configured
//! backends: the mirror first (same LAN, cheap), then the primary.

use super::store::SyncStore;
use super::{QueueItem, QueueKind, VIDEO_RETRY_DELAY, is_video_path, retry_backoff,
    rewrite_key_extension, video_fallback_path};
use crate::core::errors::ColdStoreError;
use crate::core::metrics;
use crate::core::state::AppState;
use crate::core::storage::{ObjectStore, StoreBody};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Upper bound on rows drained per tick so shutdown stays responsive.
const MAX_ITEMS_PER_TICK: usize = 50;

pub struct UploadWorker {
    state: Arc<AppState>,
    store: SyncStore,
    worker_id: usize,
}

impl UploadWorker {
    pub fn new(state: Arc<AppState>, worker_id: usize) -> Self {
        let store = SyncStore::new(state.db.clone());
        Self {
            state,
            store,
            worker_id,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker = self.worker_id, "upload worker started");
        let mut interval = tokio::time::interval(self.state.config.media.worker_tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.drain().await {
                        warn!(worker = self.worker_id, error = %e, "worker pass failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(worker = self.worker_id, "upload worker shutting down");
                    return;
                }
            }
        }
    }

    /// Claims and processes rows until both queues are drained or the
    /// per-tick bound is reached.
    async fn drain(&self) -> Result<(), ColdStoreError> {
        for _ in 0..MAX_ITEMS_PER_TICK {
            let item = match self.store.pick_next(QueueKind::Media).await? {
                Some(item) => item,
                None => match self.store.pick_next(QueueKind::Pool).await? {
                    Some(item) => item,
                    None => return Ok(()),
                },
            };
            self.process(item).await?;
        }
        Ok(())
    }

    async fn process(&self, mut item: QueueItem) -> Result<(), ColdStoreError> {
        debug!(worker = self.worker_id, id = item.id, key = %item.object_key, "processing queue item");

        let path = match self.resolve_path(&mut item).await? {
            Some(path) => path,
            // The row has already been marked skipped or re-armed.
            None => return Ok(()),
        };

        match self.upload_targets(&item, &path).await {
            Ok(()) => self.store.mark_synced(item.kind, item.id).await,
            Err(e) => {
                warn!(id = item.id, key = %item.object_key, error = %e, "upload failed");
                if item.retry_count + 1 < item.max_retries {
                    self.store
                        .mark_retry(item.kind, item.id, &e.to_string(), retry_backoff(item.retry_count))
                        .await
                } else {
                    self.store
                        .mark_failed(item.kind, item.id, &e.to_string())
                        .await
                }
            }
        }
    }

    /// Resolves the row's file on disk, applying the video extension
    /// rewrite when the original is gone but a converted `.mp4` exists.
    /// Returns `None` when the row was dispatched to a terminal state.
    async fn resolve_path(&self, item: &mut QueueItem) -> Result<Option<PathBuf>, ColdStoreError> {
        let original = PathBuf::from(&item.local_path);
        if tokio::fs::try_exists(&original).await? {
            return Ok(Some(original));
        }

        if is_video_path(&item.local_path) {
            if let Some(converted) = video_fallback_path(&item.local_path) {
                if tokio::fs::try_exists(&converted).await? {
                    let new_key = rewrite_key_extension(&item.object_key, "mp4");
                    let new_path = converted.to_string_lossy().into_owned();
                    self.store
                        .set_object_key(item.kind, item.id, &new_key, &new_path)
                        .await?;
                    item.object_key = new_key;
                    item.local_path = new_path;
                    return Ok(Some(converted));
                }
            }
            // The conversion job may still be running; give it another 30s.
            if item.retry_count < 3 {
                self.store
                    .mark_retry(item.kind, item.id, "video file not found yet", VIDEO_RETRY_DELAY)
                    .await?;
            } else {
                self.store
                    .mark_skipped(item.kind, item.id, "video file never appeared")
                    .await?;
            }
            return Ok(None);
        }

        self.store
            .mark_skipped(item.kind, item.id, "file not found on disk")
            .await?;
        Ok(None)
    }

    /// Uploads to the mirror first, then the primary, updating the
    /// per-backend flags as each succeeds so a retry resumes where it
    /// stopped.
    async fn upload_targets(&self, item: &QueueItem, path: &PathBuf) -> Result<(), ColdStoreError> {
        if let Some(mirror) = &self.state.media_mirror {
            if !item.mirror_synced {
                match mirror
                    .upload(&item.object_key, StoreBody::File(path.clone()))
                    .await
                {
                    Ok(()) => {
                        self.store
                            .set_backend_synced(item.kind, item.id, true)
                            .await?;
                        metrics::SYNC_UPLOADS_TOTAL
                            .with_label_values(&["mirror", "success"])
                            .inc();
                    }
                    Err(e) => {
                        metrics::SYNC_UPLOADS_TOTAL
                            .with_label_values(&["mirror", "failed"])
                            .inc();
                        return Err(e);
                    }
                }
            }
        }

        if let Some(primary) = &self.state.media_primary {
            if !item.primary_synced {
                match primary
                    .upload(&item.object_key, StoreBody::File(path.clone()))
                    .await
                {
                    Ok(()) => {
                        self.store
                            .set_backend_synced(item.kind, item.id, false)
                            .await?;
                        metrics::SYNC_UPLOADS_TOTAL
                            .with_label_values(&["primary", "success"])
                            .inc();
                        if let (Some(source), Some(source_id)) = (item.source, item.source_id) {
                            self.store
                                .stamp_media_file(source, source_id, &item.object_key)
                                .await?;
                        }
                    }
                    Err(e) => {
                        metrics::SYNC_UPLOADS_TOTAL
                            .with_label_values(&["primary", "failed"])
                            .inc();
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }
}
