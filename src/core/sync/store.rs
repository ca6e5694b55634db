// src/core/sync/store.rs

//! Queue persistence. The pick operation hands one row to exactly one
//! worker via `FOR UPDATE SKIP LOCKED` inside a single statement.

use super::{MediaSource, QueueItem, QueueKind, SyncStatus};
use crate::core::errors::ColdStoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;

fn item_from_row(kind: QueueKind, row: &PgRow) -> Result<QueueItem, ColdStoreError> {
    let status_text: String = row.try_get("status")?;
    let (source, source_id, pool_name, relative_path) = match kind {
        QueueKind::Media => {
            let source_text: String = row.try_get("source")?;
            let source = MediaSource::from_str(&source_text).map_err(|_| {
                ColdStoreError::Internal(format!("bad media source '{source_text}'"))
            })?;
            (Some(source), Some(row.try_get::<i64, _>("source_id")?), None, None)
        }
        QueueKind::Pool => (
            None,
            None,
            Some(row.try_get::<String, _>("pool_name")?),
            Some(row.try_get::<String, _>("relative_path")?),
        ),
    };
    Ok(QueueItem {
        id: row.try_get("id")?,
        kind,
        source,
        source_id,
        pool_name,
        relative_path,
        local_path: row.try_get("local_path")?,
        object_key: row.try_get("object_key")?,
        file_size: row.try_get("file_size")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        primary_synced: row.try_get("primary_synced")?,
        mirror_synced: row.try_get("mirror_synced")?,
        local_synced: row.try_get("local_synced")?,
        status: SyncStatus::from_str(&status_text)
            .map_err(|_| ColdStoreError::Internal(format!("bad sync status '{status_text}'")))?,
        last_error: row.try_get("last_error")?,
    })
}

fn columns(kind: QueueKind) -> &'static str {
    match kind {
        QueueKind::Media => {
            "id, source, source_id, local_path, object_key, file_size, retry_count, \
             max_retries, primary_synced, mirror_synced, local_synced, status, last_error"
        }
        QueueKind::Pool => {
            "id, pool_name, relative_path, local_path, object_key, file_size, retry_count, \
             max_retries, primary_synced, mirror_synced, local_synced, status, last_error"
        }
    }
}

/// Per-status row counts for one queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub in_flight: i64,
    pub synced: i64,
    pub failed: i64,
    pub skipped: i64,
}

#[derive(Clone)]
pub struct SyncStore {
    pool: PgPool,
}

impl SyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueues a media record for upload, re-arming the row if it already
    /// exists.
    pub async fn enqueue_media(
        &self,
        source: MediaSource,
        source_id: i64,
        local_path: &str,
        object_key: &str,
        file_size: i64,
        max_retries: i32,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "INSERT INTO media_sync_queue \
             (source, source_id, local_path, object_key, file_size, max_retries) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (source, source_id, object_key) DO UPDATE \
             SET local_path = EXCLUDED.local_path, file_size = EXCLUDED.file_size, \
                 status = 'pending', retry_count = 0, next_retry_at = now(), last_error = NULL",
        )
        .bind(source.to_string())
        .bind(source_id)
        .bind(local_path)
        .bind(object_key)
        .bind(file_size)
        .bind(max_retries)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upserts a scanned pool file. Returns true when the row was created
    /// or re-armed because the file's modification time advanced; an
    /// unchanged file leaves its row untouched.
    pub async fn upsert_pool_file(
        &self,
        pool_name: &str,
        relative_path: &str,
        local_path: &str,
        object_key: &str,
        file_size: i64,
        modified_at: Option<DateTime<Utc>>,
        max_retries: i32,
    ) -> Result<bool, ColdStoreError> {
        let existing = sqlx::query(
            "SELECT id, file_modified_at FROM pool_sync_queue \
             WHERE pool_name = $1 AND relative_path = $2",
        )
        .bind(pool_name)
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO pool_sync_queue \
                     (pool_name, relative_path, local_path, object_key, file_size, \
                      file_modified_at, max_retries) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(pool_name)
                .bind(relative_path)
                .bind(local_path)
                .bind(object_key)
                .bind(file_size)
                .bind(modified_at)
                .bind(max_retries)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let known: Option<DateTime<Utc>> = row.try_get("file_modified_at")?;
                let advanced = match (known, modified_at) {
                    (Some(old), Some(new)) => new > old,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if advanced {
                    sqlx::query(
                        "UPDATE pool_sync_queue SET local_path = $2, file_size = $3, \
                         file_modified_at = $4, status = 'pending', retry_count = 0, \
                         primary_synced = FALSE, mirror_synced = FALSE, \
                         next_retry_at = now(), last_error = NULL WHERE id = $1",
                    )
                    .bind(id)
                    .bind(local_path)
                    .bind(file_size)
                    .bind(modified_at)
                    .execute(&self.pool)
                    .await?;
                }
                Ok(advanced)
            }
        }
    }

    /// Atomically selects one eligible row and marks it in-flight. The
    /// `FOR UPDATE SKIP LOCKED` subselect guarantees exactly one worker
    /// holds any given row.
    pub async fn pick_next(&self, kind: QueueKind) -> Result<Option<QueueItem>, ColdStoreError> {
        let table = kind.table();
        let row = sqlx::query(&format!(
            "UPDATE {table} SET status = 'in-flight', started_at = now() \
             WHERE id = (SELECT id FROM {table} \
                         WHERE status = 'pending' AND next_retry_at <= now() \
                         ORDER BY next_retry_at LIMIT 1 FOR UPDATE SKIP LOCKED) \
             RETURNING {columns}",
            columns = columns(kind),
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(|r| item_from_row(kind, r)).transpose()
    }

    pub async fn set_backend_synced(
        &self,
        kind: QueueKind,
        id: i64,
        mirror: bool,
    ) -> Result<(), ColdStoreError> {
        let column = if mirror { "mirror_synced" } else { "primary_synced" };
        sqlx::query(&format!(
            "UPDATE {} SET {column} = TRUE WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Updates the stored key after an extension rewrite so readers and
    /// bulk restore see the uploaded object.
    pub async fn set_object_key(
        &self,
        kind: QueueKind,
        id: i64,
        object_key: &str,
        local_path: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(&format!(
            "UPDATE {} SET object_key = $2, local_path = $3 WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .bind(object_key)
        .bind(local_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_synced(&self, kind: QueueKind, id: i64) -> Result<(), ColdStoreError> {
        sqlx::query(&format!(
            "UPDATE {} SET status = 'synced', completed_at = now(), last_error = NULL \
             WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-arms the row for another attempt after a transient failure.
    pub async fn mark_retry(
        &self,
        kind: QueueKind,
        id: i64,
        error: &str,
        delay: Duration,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(&format!(
            "UPDATE {} SET status = 'pending', retry_count = retry_count + 1, \
             last_error = $2, next_retry_at = now() + make_interval(secs => $3) \
             WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        kind: QueueKind,
        id: i64,
        error: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(&format!(
            "UPDATE {} SET status = 'failed', retry_count = retry_count + 1, \
             last_error = $2, completed_at = now() WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_skipped(
        &self,
        kind: QueueKind,
        id: i64,
        reason: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(&format!(
            "UPDATE {} SET status = 'skipped', last_error = $2, completed_at = now() \
             WHERE id = $1",
            kind.table()
        ))
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stamps the source media row so readers can compute download URLs.
    pub async fn stamp_media_file(
        &self,
        source: MediaSource,
        source_id: i64,
        cloud_key: &str,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "UPDATE media_files SET cloud_synced = TRUE, cloud_key = $3 \
             WHERE source = $1 AND source_id = $2",
        )
        .bind(source.to_string())
        .bind(source_id)
        .bind(cloud_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Moves every failed row back to pending for another round.
    pub async fn retry_failed(&self) -> Result<u64, ColdStoreError> {
        let mut total = 0u64;
        for kind in [QueueKind::Media, QueueKind::Pool] {
            let result = sqlx::query(&format!(
                "UPDATE {} SET status = 'pending', retry_count = 0, \
                 next_retry_at = now(), last_error = NULL WHERE status = 'failed'",
                kind.table()
            ))
            .execute(&self.pool)
            .await?;
            total += result.rows_affected();
        }
        Ok(total)
    }

    pub async fn failed_items(&self, limit: i64) -> Result<Vec<QueueItem>, ColdStoreError> {
        let mut items = Vec::new();
        for kind in [QueueKind::Media, QueueKind::Pool] {
            let rows = sqlx::query(&format!(
                "SELECT {} FROM {} WHERE status = 'failed' ORDER BY id LIMIT $1",
                columns(kind),
                kind.table()
            ))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            for row in &rows {
                items.push(item_from_row(kind, row)?);
            }
        }
        Ok(items)
    }

    pub async fn synced_items(&self, kind: QueueKind) -> Result<Vec<QueueItem>, ColdStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE status = 'synced' ORDER BY id",
            columns(kind),
            kind.table()
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| item_from_row(kind, row)).collect()
    }

    pub async fn stats(&self, kind: QueueKind) -> Result<QueueStats, ColdStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT status, count(*) AS total FROM {} GROUP BY status",
            kind.table()
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            match status.as_str() {
                "pending" => stats.pending = total,
                "in-flight" => stats.in_flight = total,
                "synced" => stats.synced = total,
                "failed" => stats.failed = total,
                "skipped" => stats.skipped = total,
                _ => {}
            }
        }
        Ok(stats)
    }

    // --- Pool scan state ---

    /// Acquires the pool's advisory single-writer flag. Returns false when
    /// another scan currently holds it.
    pub async fn try_begin_scan(&self, pool_name: &str) -> Result<bool, ColdStoreError> {
        sqlx::query(
            "INSERT INTO pool_scan_state (pool_name) VALUES ($1) \
             ON CONFLICT (pool_name) DO NOTHING",
        )
        .bind(pool_name)
        .execute(&self.pool)
        .await?;
        let result = sqlx::query(
            "UPDATE pool_scan_state SET is_scanning = TRUE \
             WHERE pool_name = $1 AND NOT is_scanning",
        )
        .bind(pool_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Records a scan result and releases the flag. Called on success and
    /// on error alike.
    pub async fn finish_scan(
        &self,
        pool_name: &str,
        files_found: i64,
        files_enqueued: i64,
        duration: Duration,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "UPDATE pool_scan_state SET is_scanning = FALSE, last_scan_at = now(), \
             files_found = $2, files_enqueued = $3, scan_duration_ms = $4 \
             WHERE pool_name = $1",
        )
        .bind(pool_name)
        .bind(files_found)
        .bind(files_enqueued)
        .bind(duration.as_millis() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
