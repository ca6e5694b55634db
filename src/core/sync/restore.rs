// src/core/sync/restore.rs

//! Bulk restore: re-materialise synced queue rows on local disk,
//! preferring the mirror backend for downloads.

use super::store::SyncStore;
use super::QueueKind;
use crate::core::errors::ColdStoreError;
use crate::core::state::AppState;
use crate::core::storage::download_with_fallback;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkRestoreSummary {
    pub examined: usize,
    pub restored: usize,
    pub already_present: usize,
    pub failed: usize,
}

pub struct BulkRestorer {
    state: Arc<AppState>,
    store: SyncStore,
}

impl BulkRestorer {
    pub fn new(state: Arc<AppState>) -> Self {
        let store = SyncStore::new(state.db.clone());
        Self { state, store }
    }

    /// Downloads every synced queue row whose local file is missing,
    /// writing to the original local path with parents created. Partial
    /// files are removed on write failure.
    pub async fn run(&self) -> Result<BulkRestoreSummary, ColdStoreError> {
        let mut summary = BulkRestoreSummary::default();

        // Mirror first: same LAN, cheap; the primary is the fallback.
        let backends: Vec<_> = [
            self.state.media_mirror.as_deref(),
            self.state.media_primary.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if backends.is_empty() {
            return Err(ColdStoreError::Validation(
                "no sync backends configured".to_string(),
            ));
        }

        for kind in [QueueKind::Media, QueueKind::Pool] {
            for item in self.store.synced_items(kind).await? {
                summary.examined += 1;
                let path = Path::new(&item.local_path);
                if tokio::fs::try_exists(path).await? {
                    summary.already_present += 1;
                    continue;
                }
                match self.restore_one(&item.object_key, path, &backends).await {
                    Ok(served_by) => {
                        summary.restored += 1;
                        info!(key = %item.object_key, backend = %served_by, "restored file");
                    }
                    Err(e) => {
                        summary.failed += 1;
                        warn!(key = %item.object_key, error = %e, "bulk restore item failed");
                    }
                }
            }
        }

        info!(
            examined = summary.examined,
            restored = summary.restored,
            failed = summary.failed,
            "bulk restore finished"
        );
        Ok(summary)
    }

    async fn restore_one(
        &self,
        key: &str,
        path: &Path,
        backends: &[&crate::core::storage::ObjectBackend],
    ) -> Result<String, ColdStoreError> {
        let (mut download, served_by) =
            download_with_fallback(key, backends).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        match tokio::io::copy(&mut download.reader, &mut file).await {
            Ok(_) => {
                file.flush().await?;
                Ok(served_by)
            }
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
                Err(e.into())
            }
        }
    }
}
