// src/server/initialization.rs

//! Builds the shared state: database pool, migrations, object-store
//! backends, the remote shell and the node inventory seed.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::migrate::{MigrationRunner, MigrationSource};
use crate::core::remote::RemoteShell;
use crate::core::state::AppState;
use crate::core::storage::{LocalStore, ObjectBackend, S3Store};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub async fn setup(config: Config) -> Result<ServerContext> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url())
        .await
        .with_context(|| {
            format!(
                "could not connect to postgres at {}:{}",
                config.database.host, config.database.port
            )
        })?;

    let applied = MigrationRunner::new(pool.clone())
        .run(MigrationSource::Embedded)
        .await
        .context("database migration failed")?;
    if applied > 0 {
        info!(applied, "database migrations applied");
    }

    // Seed the node inventory from the configuration. Existing addresses
    // are left untouched.
    for seed in &config.cluster.nodes {
        if seed.role.parse::<crate::core::cluster::NodeRole>().is_err() {
            warn!(address = %seed.ip, role = %seed.role, "skipping seed node with unknown role");
            continue;
        }
        let inserted = sqlx::query(
            "INSERT INTO cluster_nodes (address, hostname, role, shell_user, shell_port) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (address) DO NOTHING",
        )
        .bind(&seed.ip)
        .bind(&seed.hostname)
        .bind(&seed.role)
        .bind(&config.ssh.user)
        .bind(config.ssh.port as i32)
        .execute(&pool)
        .await?;
        if inserted.rows_affected() > 0 {
            info!(address = %seed.ip, role = %seed.role, "seeded node from configuration");
        }
    }

    let snapshot_local = Arc::new(ObjectBackend::Local(LocalStore::new(
        "snapshot-local",
        &config.snapshot.local_dir,
    )));
    let snapshot_cloud = match &config.snapshot.s3 {
        Some(s3) => Some(Arc::new(ObjectBackend::S3(S3Store::new("snapshot-cloud", s3)?))),
        None => {
            warn!("no cloud snapshot backend configured; snapshots stay local");
            None
        }
    };
    let media_primary = match &config.media.primary {
        Some(s3) => Some(Arc::new(ObjectBackend::S3(S3Store::new("media-primary", s3)?))),
        None => None,
    };
    let media_mirror = match &config.media.mirror {
        Some(s3) => Some(Arc::new(ObjectBackend::S3(S3Store::new("media-mirror", s3)?))),
        None => None,
    };

    let shell = Arc::new(RemoteShell::new(config.ssh.connect_timeout));
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = Arc::new(AppState::new(
        Arc::new(config),
        pool,
        shell,
        snapshot_local,
        snapshot_cloud,
        media_primary,
        media_mirror,
    ));

    Ok(ServerContext {
        state,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}
