// src/core/state.rs

//! Defines the central `AppState` struct, holding all shared server-wide state.

use crate::config::Config;
use crate::core::errors::ColdStoreError;
use crate::core::remote::RemoteShell;
use crate::core::restore::tokens::RestoreTokenStore;
use crate::core::storage::ObjectBackend;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, broadcast};

/// Capacity of every per-pipeline progress channel. Producers never block:
/// slow consumers lose the oldest events.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 16;

/// Maximum entries retained by the in-memory API log buffer.
const API_LOG_CAPACITY: usize = 1000;

/// A single step/progress record emitted by the provisioning and
/// deployment pipelines and forwarded to API consumers over SSE.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub step: String,
    pub status: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(step: &str, status: &str, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            status: status.to_string(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Fan-in point between producing pipelines and the API layer. Each running
/// pipeline owns one bounded broadcast channel, keyed by a topic such as
/// `node:7` or `deploy:42`.
#[derive(Debug, Default)]
pub struct ProgressHub {
    channels: DashMap<String, broadcast::Sender<ProgressEvent>>,
}

impl ProgressHub {
    /// Returns the sender for a topic, creating the channel on first use.
    pub fn publisher(&self, topic: &str) -> broadcast::Sender<ProgressEvent> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(PROGRESS_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribes to a topic's events. Lagging subscribers skip events
    /// rather than stalling the producer.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<ProgressEvent> {
        self.publisher(topic).subscribe()
    }

    /// Drops a topic once its pipeline has finished.
    pub fn close(&self, topic: &str) {
        self.channels.remove(topic);
    }
}

/// One API request, as retained by the in-memory log buffer.
#[derive(Debug, Clone, Serialize)]
pub struct ApiLogEntry {
    pub at: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub user_id: Option<String>,
}

/// A capped ring buffer of recent API requests, used when the time-series
/// sink is unavailable. A single lock guards it.
#[derive(Debug, Default)]
pub struct ApiLogBuffer {
    entries: Mutex<VecDeque<ApiLogEntry>>,
}

impl ApiLogBuffer {
    pub fn push(&self, entry: ApiLogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= API_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<ApiLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// The central struct holding all shared, server-wide state.
/// Wrapped in an `Arc` and handed to every task, route handler and
/// background worker.
pub struct AppState {
    /// The resolved server configuration.
    pub config: Arc<Config>,
    /// The shared application database pool.
    pub db: PgPool,
    /// Remote shell used by the cluster and deployment pipelines.
    pub shell: Arc<RemoteShell>,
    /// Cloud snapshot backend, when `[snapshot.s3]` is configured.
    pub snapshot_cloud: Option<Arc<ObjectBackend>>,
    /// Local snapshot backend rooted at `snapshot.local_dir`.
    pub snapshot_local: Arc<ObjectBackend>,
    /// Primary media backend, when configured.
    pub media_primary: Option<Arc<ObjectBackend>>,
    /// Mirror media backend, when configured.
    pub media_mirror: Option<Arc<ObjectBackend>>,
    /// Pending restore confirmation tokens. In memory only; lost on restart.
    pub restore_tokens: RestoreTokenStore,
    /// Completion time of the last successful restore, for the global cooldown.
    pub last_restore_at: Mutex<Option<Instant>>,
    /// Per-node pipeline serialisation.
    node_locks: DashMap<i64, Arc<AsyncMutex<()>>>,
    /// Per-deployment-config pipeline serialisation.
    deploy_locks: DashMap<i64, Arc<AsyncMutex<()>>>,
    /// Cancellation handles for running deployments, keyed by history id.
    pub deploy_cancels: DashMap<i64, tokio_util::sync::CancellationToken>,
    /// Unix seconds captured at startup, the first half of auto-generated
    /// deployment versions.
    version_epoch: u64,
    /// Monotonic counter, the second half of auto-generated versions.
    version_counter: AtomicU64,
    /// Step/progress fan-in for SSE consumers.
    pub progress: ProgressHub,
    /// Capped in-memory API request log.
    pub api_log: ApiLogBuffer,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        db: PgPool,
        shell: Arc<RemoteShell>,
        snapshot_local: Arc<ObjectBackend>,
        snapshot_cloud: Option<Arc<ObjectBackend>>,
        media_primary: Option<Arc<ObjectBackend>>,
        media_mirror: Option<Arc<ObjectBackend>>,
    ) -> Self {
        Self {
            config,
            db,
            shell,
            snapshot_cloud,
            snapshot_local,
            media_primary,
            media_mirror,
            restore_tokens: RestoreTokenStore::default(),
            last_restore_at: Mutex::new(None),
            node_locks: DashMap::new(),
            deploy_locks: DashMap::new(),
            deploy_cancels: DashMap::new(),
            version_epoch: Utc::now().timestamp().max(0) as u64,
            version_counter: AtomicU64::new(0),
            progress: ProgressHub::default(),
            api_log: ApiLogBuffer::default(),
        }
    }

    /// Acquires the pipeline lock for a node, or fails with a busy error if
    /// another pipeline already holds it.
    pub fn try_node_lock(&self, node_id: i64) -> Result<OwnedMutexGuard<()>, ColdStoreError> {
        let lock = self
            .node_locks
            .entry(node_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.try_lock_owned()
            .map_err(|_| ColdStoreError::Busy(format!("node {node_id}")))
    }

    /// Acquires the pipeline lock for a deployment config, or fails with a
    /// busy error if a deployment is already building or deploying.
    pub fn try_deploy_lock(&self, config_id: i64) -> Result<OwnedMutexGuard<()>, ColdStoreError> {
        let lock = self
            .deploy_locks
            .entry(config_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.try_lock_owned()
            .map_err(|_| ColdStoreError::Busy(format!("deployment config {config_id}")))
    }

    /// The next auto-generated deployment version,
    /// `v<unix-seconds>.<counter>`.
    pub fn next_version(&self) -> String {
        let counter = self.version_counter.fetch_add(1, Ordering::Relaxed);
        format!("v{}.{counter}", self.version_epoch)
    }
}
