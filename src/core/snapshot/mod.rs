// src/core/snapshot/mod.rs

//! Change-aware snapshotting: decide when a database snapshot is
//! warranted, take it with `pg_dump`, store it locally and in the cloud
//! under a time-partitioned key layout, and retire old seasons.

use crate::core::errors::ColdStoreError;
use crate::core::metrics;
use crate::core::state::AppState;
use crate::core::storage::{ObjectStore, StoreBody};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use strum_macros::{Display, EnumString};
use tracing::{info, warn};

/// Snapshot classes, doubling as restore sources.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SnapshotClass {
    Local,
    Cloud,
}

static SNAPSHOT_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cold_db_(\d{8})_(\d{6})\.sql$").expect("valid regex"));
static PRE_RESTORE_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cold_prerestore_(\d{8})_(\d{6})\.sql$").expect("valid regex"));

/// The fiscal season `YYYY-YY`: the starting year increments on October 1.
pub fn season_for(date: NaiveDate) -> String {
    let start_year = if date.month() >= 10 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{start_year}-{:02}", (start_year + 1) % 100)
}

/// The season immediately before the one containing `date`.
pub fn previous_season(date: NaiveDate) -> String {
    let start_year = if date.month() >= 10 {
        date.year()
    } else {
        date.year() - 1
    } - 1;
    format!("{start_year}-{:02}", (start_year + 1) % 100)
}

/// Builds the time-partitioned snapshot key:
/// `base/YYYY/MM/DD/HH/cold_db_YYYYMMDD_HHMMSS.sql`.
pub fn snapshot_key(base_prefix: &str, at: DateTime<Utc>) -> String {
    format!(
        "{base_prefix}/{:04}/{:02}/{:02}/{:02}/cold_db_{:04}{:02}{:02}_{:02}{:02}{:02}.sql",
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
    )
}

/// Builds the pre-restore safety key:
/// `pre-restore/YYYY/MM/DD/cold_prerestore_YYYYMMDD_HHMMSS.sql`.
pub fn pre_restore_key(prefix: &str, at: DateTime<Utc>) -> String {
    format!(
        "{prefix}/{:04}/{:02}/{:02}/cold_prerestore_{:04}{:02}{:02}_{:02}{:02}{:02}.sql",
        at.year(),
        at.month(),
        at.day(),
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
    )
}

/// Extracts the timestamp from a snapshot or pre-restore key.
pub fn parse_snapshot_timestamp(key: &str) -> Option<NaiveDateTime> {
    let captures = SNAPSHOT_FILENAME
        .captures(key)
        .or_else(|| PRE_RESTORE_FILENAME.captures(key))?;
    let date = NaiveDate::parse_from_str(captures.get(1)?.as_str(), "%Y%m%d").ok()?;
    let time = chrono::NaiveTime::parse_from_str(captures.get(2)?.as_str(), "%H%M%S").ok()?;
    Some(date.and_time(time))
}

/// "Has the database changed since the last snapshot of this class?"
pub struct SnapshotDecider {
    pool: PgPool,
}

impl SnapshotDecider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns true when a snapshot is warranted. Any query error fails
    /// open: a redundant snapshot is cheaper than a missing one.
    pub async fn is_snapshot_required(&self, class: SnapshotClass) -> bool {
        match self.check(class).await {
            Ok(required) => required,
            Err(e) => {
                warn!(class = %class, error = %e, "snapshot decision failed, failing open");
                true
            }
        }
    }

    async fn check(&self, class: SnapshotClass) -> Result<bool, ColdStoreError> {
        let change_row = sqlx::query("SELECT max(last_modified) AS lm FROM change_tracking")
            .fetch_one(&self.pool)
            .await?;
        let last_modified: Option<DateTime<Utc>> = change_row.try_get("lm")?;

        let prior_row = sqlx::query(
            "SELECT max(created_at) AS created FROM snapshot_metadata WHERE snapshot_type = $1",
        )
        .bind(class.to_string())
        .fetch_one(&self.pool)
        .await?;
        let prior: Option<DateTime<Utc>> = prior_row.try_get("created")?;

        Ok(match (prior, last_modified) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(prior), Some(changed)) => changed > prior,
        })
    }

    /// An opaque monotonic token capturing the database logical position.
    pub async fn db_version(&self) -> String {
        let lsn = sqlx::query("SELECT pg_current_wal_lsn()::text AS v")
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get::<String, _>("v"));
        match lsn {
            Ok(v) => v,
            Err(_) => sqlx::query("SELECT txid_current()::text AS v")
                .fetch_one(&self.pool)
                .await
                .and_then(|row| row.try_get("v"))
                .unwrap_or_default(),
        }
    }

    /// Upserts the metadata row for a snapshot that was just taken.
    pub async fn record_snapshot(
        &self,
        class: SnapshotClass,
        key: &str,
        db_version: &str,
        size_bytes: u64,
        at: DateTime<Utc>,
    ) -> Result<(), ColdStoreError> {
        sqlx::query(
            "INSERT INTO snapshot_metadata \
             (snapshot_type, snapshot_key, db_version, size_bytes, season, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (snapshot_type, snapshot_key) DO UPDATE \
             SET db_version = EXCLUDED.db_version, size_bytes = EXCLUDED.size_bytes, \
                 season = EXCLUDED.season, created_at = EXCLUDED.created_at",
        )
        .bind(class.to_string())
        .bind(key)
        .bind(db_version)
        .bind(size_bytes as i64)
        .bind(season_for(at.date_naive()))
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Takes snapshots with `pg_dump` and places them according to class.
pub struct Snapshotter {
    state: Arc<AppState>,
    decider: SnapshotDecider,
}

impl Snapshotter {
    pub fn new(state: Arc<AppState>) -> Self {
        let decider = SnapshotDecider::new(state.db.clone());
        Self { state, decider }
    }

    pub fn decider(&self) -> &SnapshotDecider {
        &self.decider
    }

    /// Takes a snapshot of the given class and records its metadata.
    /// Returns the object key.
    pub async fn take(&self, class: SnapshotClass) -> Result<String, ColdStoreError> {
        let started = Instant::now();
        let now = Utc::now();
        let key = snapshot_key(&self.state.config.snapshot.base_prefix, now);

        let dump = self.dump_to_temp().await?;
        let size = tokio::fs::metadata(&dump).await?.len();
        let db_version = self.decider.db_version().await;

        let upload_result = match class {
            SnapshotClass::Local => {
                self.state
                    .snapshot_local
                    .upload(&key, StoreBody::File(dump.clone()))
                    .await
            }
            SnapshotClass::Cloud => match &self.state.snapshot_cloud {
                Some(cloud) => cloud.upload(&key, StoreBody::File(dump.clone())).await,
                None => Err(ColdStoreError::Config(
                    "no cloud snapshot backend configured".to_string(),
                )),
            },
        };
        let _ = tokio::fs::remove_file(&dump).await;
        upload_result?;

        self.decider
            .record_snapshot(class, &key, &db_version, size, now)
            .await?;
        metrics::SNAPSHOTS_TOTAL
            .with_label_values(&[class.to_string().as_str()])
            .inc();
        metrics::SNAPSHOT_SECONDS.observe(started.elapsed().as_secs_f64());
        info!(class = %class, key = %key, size, "snapshot recorded");
        Ok(key)
    }

    /// Takes the pre-restore safety snapshot: always locally, and to the
    /// cloud backend when one is reachable.
    pub async fn take_pre_restore(&self) -> Result<String, ColdStoreError> {
        let now = Utc::now();
        let key = pre_restore_key(&self.state.config.snapshot.pre_restore_prefix, now);

        let dump = self.dump_to_temp().await?;
        let size = tokio::fs::metadata(&dump).await?.len();
        let db_version = self.decider.db_version().await;

        let local_result = self
            .state
            .snapshot_local
            .upload(&key, StoreBody::File(dump.clone()))
            .await;
        if local_result.is_ok() {
            self.decider
                .record_snapshot(SnapshotClass::Local, &key, &db_version, size, now)
                .await?;
        }

        let mut cloud_ok = false;
        if let Some(cloud) = &self.state.snapshot_cloud {
            match cloud.upload(&key, StoreBody::File(dump.clone())).await {
                Ok(()) => {
                    cloud_ok = true;
                    self.decider
                        .record_snapshot(SnapshotClass::Cloud, &key, &db_version, size, now)
                        .await?;
                }
                Err(e) => {
                    warn!(error = %e, "pre-restore cloud upload failed; keeping local copy");
                }
            }
        }
        let _ = tokio::fs::remove_file(&dump).await;

        if local_result.is_err() && !cloud_ok {
            return Err(local_result.expect_err("checked is_err above"));
        }
        metrics::SNAPSHOTS_TOTAL.with_label_values(&["pre-restore"]).inc();
        Ok(key)
    }

    /// Runs `pg_dump --data-only` with a fixed argv, writing to a temp
    /// file. The schema side of a restore comes from the embedded
    /// migrations, so dumps carry data only.
    async fn dump_to_temp(&self) -> Result<PathBuf, ColdStoreError> {
        let db = &self.state.config.database;
        let path =
            std::env::temp_dir().join(format!("coldstored-dump-{}.sql", uuid::Uuid::new_v4()));
        let file = std::fs::File::create(&path)?;

        let port = db.port.to_string();
        let mut command = tokio::process::Command::new("pg_dump");
        command
            .args([
                "--data-only",
                "--disable-triggers",
                "--no-owner",
                "-h",
                db.host.as_str(),
                "-p",
                port.as_str(),
                "-U",
                db.user.as_str(),
                "-d",
                db.dbname.as_str(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(password) = &db.password {
            command.env("PGPASSWORD", password);
        }

        let output = command.spawn()?.wait_with_output().await?;
        if !output.status.success() {
            let _ = tokio::fs::remove_file(&path).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ColdStoreError::Internal(format!(
                "pg_dump failed: {}",
                stderr.trim()
            )));
        }
        Ok(path)
    }

    /// Season rollover: keep the current and previous season only, pruning
    /// metadata rows and stored objects. The `pre-restore/` prefix is left
    /// untouched; those snapshots are the recovery path for destructive
    /// failures.
    pub async fn cleanup_seasons(&self) -> Result<(), ColdStoreError> {
        let today = Utc::now().date_naive();
        let keep_current = season_for(today);
        let keep_previous = previous_season(today);

        sqlx::query(
            "DELETE FROM snapshot_metadata WHERE season <> $1 AND season <> $2 \
             AND snapshot_key LIKE $3",
        )
        .bind(&keep_current)
        .bind(&keep_previous)
        .bind(format!("{}/%", self.state.config.snapshot.base_prefix))
        .execute(&self.state.db)
        .await?;

        self.prune_backend_seasons(&self.state.snapshot_local, &keep_current, &keep_previous)
            .await?;
        if let Some(cloud) = &self.state.snapshot_cloud {
            self.prune_backend_seasons(cloud, &keep_current, &keep_previous)
                .await?;
        }
        Ok(())
    }

    async fn prune_backend_seasons(
        &self,
        backend: &crate::core::storage::ObjectBackend,
        keep_current: &str,
        keep_previous: &str,
    ) -> Result<(), ColdStoreError> {
        let base = &self.state.config.snapshot.base_prefix;
        for year_entry in backend.list(&format!("{base}/")).await? {
            if !year_entry.is_dir {
                continue;
            }
            let Ok(year) = year_entry.name.parse::<i32>() else {
                continue;
            };
            for month_entry in backend.list(&format!("{base}/{year:04}/")).await? {
                if !month_entry.is_dir {
                    continue;
                }
                let Ok(month) = month_entry.name.parse::<u32>() else {
                    continue;
                };
                let Some(first_of_month) = NaiveDate::from_ymd_opt(year, month, 1) else {
                    continue;
                };
                let season = season_for(first_of_month);
                if season != keep_current && season != keep_previous {
                    let prefix = format!("{base}/{year:04}/{:02}/", month);
                    info!(backend = backend.name(), prefix = %prefix, season = %season, "pruning old season");
                    backend.delete(&prefix).await?;
                }
            }
        }
        Ok(())
    }
}
