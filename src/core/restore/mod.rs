// src/core/restore/mod.rs

//! Point-in-time restore: list restore points across the cloud and local
//! stores, and perform confirmed, rate-limited restores with an automatic
//! pre-restore safety snapshot.

pub mod tokens;

use crate::core::errors::ColdStoreError;
use crate::core::metrics;
use crate::core::migrate::{canonical_schema, split_statements};
use crate::core::snapshot::{SnapshotClass, Snapshotter, parse_snapshot_timestamp};
use crate::core::state::AppState;
use crate::core::storage::{ObjectBackend, ObjectStore, download_to_file};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Minimum spacing between successful restore executions.
pub const RESTORE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// A restorable snapshot discovered in either store.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub source: SnapshotClass,
    pub timestamp: NaiveDateTime,
    pub size: u64,
}

/// One calendar day of restore points.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreDateSummary {
    pub date: NaiveDate,
    pub count: usize,
    pub earliest: NaiveTime,
    pub latest: NaiveTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestorePreview {
    pub snapshot_key: String,
    pub source: SnapshotClass,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub confirmation_token: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored_at: DateTime<Utc>,
    pub snapshot_key: String,
    pub pre_restore_key: String,
    pub message: String,
}

pub struct RestoreService {
    state: Arc<AppState>,
    snapshotter: Snapshotter,
}

impl RestoreService {
    pub fn new(state: Arc<AppState>) -> Self {
        let snapshotter = Snapshotter::new(state.clone());
        Self { state, snapshotter }
    }

    fn backend_for(&self, source: SnapshotClass) -> Result<&ObjectBackend, ColdStoreError> {
        match source {
            SnapshotClass::Local => Ok(&self.state.snapshot_local),
            SnapshotClass::Cloud => self
                .state
                .snapshot_cloud
                .as_deref()
                .ok_or_else(|| {
                    ColdStoreError::Validation("no cloud snapshot backend configured".to_string())
                }),
        }
    }

    /// Enumerates snapshots from both stores, de-duplicated by timestamp.
    /// Cloud copies win over local duplicates.
    pub async fn collect_snapshots(&self) -> Result<Vec<SnapshotEntry>, ColdStoreError> {
        let base = &self.state.config.snapshot.base_prefix;
        let mut by_timestamp: BTreeMap<NaiveDateTime, SnapshotEntry> = BTreeMap::new();

        let local = self
            .state
            .snapshot_local
            .list_recursive(&format!("{base}/"))
            .await?;
        for object in local {
            if let Some(timestamp) = parse_snapshot_timestamp(&object.key) {
                by_timestamp.insert(
                    timestamp,
                    SnapshotEntry {
                        key: object.key,
                        source: SnapshotClass::Local,
                        timestamp,
                        size: object.size,
                    },
                );
            }
        }

        if let Some(cloud) = &self.state.snapshot_cloud {
            for object in cloud.list_recursive(&format!("{base}/")).await? {
                if let Some(timestamp) = parse_snapshot_timestamp(&object.key) {
                    by_timestamp.insert(
                        timestamp,
                        SnapshotEntry {
                            key: object.key,
                            source: SnapshotClass::Cloud,
                            timestamp,
                            size: object.size,
                        },
                    );
                }
            }
        }

        Ok(by_timestamp.into_values().collect())
    }

    /// Groups available snapshots by date with counts and time bounds,
    /// newest date first.
    pub async fn list_available_dates(&self) -> Result<Vec<RestoreDateSummary>, ColdStoreError> {
        let entries = self.collect_snapshots().await?;
        Ok(group_by_date(&entries))
    }

    /// All snapshots for one day, newest first.
    pub async fn list_snapshots_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<SnapshotEntry>, ColdStoreError> {
        let mut entries: Vec<SnapshotEntry> = self
            .collect_snapshots()
            .await?
            .into_iter()
            .filter(|entry| entry.timestamp.date() == date)
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// The snapshot whose time of day is nearest the target, on the same
    /// date.
    pub async fn find_closest_snapshot(
        &self,
        target: NaiveDateTime,
    ) -> Result<Option<SnapshotEntry>, ColdStoreError> {
        let entries = self.list_snapshots_for_date(target.date()).await?;
        Ok(closest_to(entries, target))
    }

    /// Step one of the two-step restore: verify the object exists and
    /// issue a confirmation token bound to (key, source, user).
    pub async fn preview(
        &self,
        snapshot_key: &str,
        source: SnapshotClass,
        user_id: &str,
    ) -> Result<RestorePreview, ColdStoreError> {
        let backend = self.backend_for(source)?;
        let meta = backend.stat(snapshot_key).await?;
        let token = self
            .state
            .restore_tokens
            .issue(snapshot_key, source, user_id)?;
        Ok(RestorePreview {
            snapshot_key: snapshot_key.to_string(),
            source,
            size: meta.size,
            last_modified: meta.last_modified,
            confirmation_token: token.token.clone(),
            expires_in_secs: token.seconds_remaining_at(Instant::now()),
        })
    }

    /// Step two: validate the cooldown and the token, then run the
    /// destructive restore. Only the rate limit, token validation and
    /// download fail before data is mutated; after that, the pre-restore
    /// key is the documented recovery path.
    pub async fn execute(
        &self,
        snapshot_key: &str,
        token: &str,
        source: SnapshotClass,
        user_id: &str,
    ) -> Result<RestoreOutcome, ColdStoreError> {
        // The cooldown is checked first so a rate-limited attempt does not
        // consume the caller's token.
        if let Some(last) = *self.state.last_restore_at.lock() {
            let elapsed = last.elapsed();
            if elapsed < RESTORE_COOLDOWN {
                return Err(ColdStoreError::RateLimited(RESTORE_COOLDOWN - elapsed));
            }
        }

        self.state
            .restore_tokens
            .consume(token, snapshot_key, source, user_id)?;

        // (a) Pre-restore safety snapshot. Failure is logged, not fatal.
        let pre_restore_key = match self.snapshotter.take_pre_restore().await {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "pre-restore snapshot failed; continuing without one");
                String::new()
            }
        };

        // (b) Download the snapshot before touching any data.
        let backend = self.backend_for(source)?;
        let dump_path =
            std::env::temp_dir().join(format!("coldstored-restore-{}.sql", uuid::Uuid::new_v4()));
        download_to_file(backend, snapshot_key, &dump_path).await?;

        let destructive = self.apply_restore(&dump_path).await;
        let _ = tokio::fs::remove_file(&dump_path).await;
        destructive.map_err(|e| ColdStoreError::RestoreFailed {
            message: e.to_string(),
            pre_restore_key: pre_restore_key.clone(),
        })?;

        let restored_at = Utc::now();
        *self.state.last_restore_at.lock() = Some(Instant::now());
        metrics::RESTORES_TOTAL.inc();
        info!(key = snapshot_key, user = user_id, "database restore complete");

        Ok(RestoreOutcome {
            restored_at,
            snapshot_key: snapshot_key.to_string(),
            pre_restore_key,
            message: "database restored; verify application state before resuming writes"
                .to_string(),
        })
    }

    /// The destructive phase: drop public tables, reapply the canonical
    /// schema, and load the dump.
    async fn apply_restore(&self, dump_path: &PathBuf) -> Result<(), ColdStoreError> {
        // (c) Drop all public-schema tables with referential checks
        // disabled around the loop.
        let mut conn = self.state.db.acquire().await?;
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT tablename FROM pg_tables WHERE schemaname = 'public'")
                .fetch_all(&mut *conn)
                .await?;
        sqlx::raw_sql("SET session_replication_role = replica")
            .execute(&mut *conn)
            .await?;
        let mut drop_result = Ok(());
        for (table,) in &tables {
            let quoted = format!("\"{}\"", table.replace('"', "\"\""));
            if let Err(e) = sqlx::raw_sql(&format!("DROP TABLE IF EXISTS {quoted} CASCADE"))
                .execute(&mut *conn)
                .await
            {
                drop_result = Err(e);
                break;
            }
        }
        let _ = sqlx::raw_sql("SET session_replication_role = DEFAULT")
            .execute(&mut *conn)
            .await;
        drop_result?;
        drop(conn);

        // (d) Reapply the canonical schema from the embedded migration.
        for statement in split_statements(canonical_schema()) {
            sqlx::raw_sql(&statement).execute(&self.state.db).await?;
        }

        // (e) Load the dump through psql; any "ERROR:" in its output fails
        // the restore.
        let db = &self.state.config.database;
        let port = db.port.to_string();
        let dump_arg = dump_path.to_string_lossy();
        let mut command = tokio::process::Command::new("psql");
        command
            .args([
                "-h",
                db.host.as_str(),
                "-p",
                port.as_str(),
                "-U",
                db.user.as_str(),
                "-d",
                db.dbname.as_str(),
                "--no-password",
                "-f",
                dump_arg.as_ref(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &db.password {
            command.env("PGPASSWORD", password);
        }
        let output = command.spawn()?.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() || stderr.contains("ERROR:") {
            let excerpt: String = stderr.chars().take(2000).collect();
            return Err(ColdStoreError::Internal(format!(
                "psql restore reported errors: {}",
                excerpt.trim()
            )));
        }
        Ok(())
    }
}

/// Groups entries into per-day summaries, newest date first.
pub fn group_by_date(entries: &[SnapshotEntry]) -> Vec<RestoreDateSummary> {
    let mut days: BTreeMap<NaiveDate, Vec<NaiveTime>> = BTreeMap::new();
    for entry in entries {
        days.entry(entry.timestamp.date())
            .or_default()
            .push(entry.timestamp.time());
    }
    days.into_iter()
        .rev()
        .map(|(date, mut times)| {
            times.sort();
            RestoreDateSummary {
                date,
                count: times.len(),
                earliest: *times.first().expect("non-empty day"),
                latest: *times.last().expect("non-empty day"),
            }
        })
        .collect()
}

/// The entry whose time of day is nearest the target.
pub fn closest_to(entries: Vec<SnapshotEntry>, target: NaiveDateTime) -> Option<SnapshotEntry> {
    entries.into_iter().min_by_key(|entry| {
        let delta = entry.timestamp.signed_duration_since(target);
        delta.num_seconds().abs()
    })
}
