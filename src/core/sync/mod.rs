// src/core/sync/mod.rs

//! Media and pool sync engine: background scanners and upload workers
//! draining per-file queues across one or two S3-compatible backends,
//! plus bulk restore from either backend.

pub mod restore;
pub mod scanner;
pub mod store;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// Which application record a media queue row belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum MediaSource {
    RoomEntry,
    GatePass,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Pending,
    InFlight,
    Synced,
    Failed,
    Skipped,
}

/// The two queue shapes sharing one worker skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Media,
    Pool,
}

impl QueueKind {
    pub fn table(self) -> &'static str {
        match self {
            QueueKind::Media => "media_sync_queue",
            QueueKind::Pool => "pool_sync_queue",
        }
    }
}

/// One row handed to a worker, from either queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub kind: QueueKind,
    pub source: Option<MediaSource>,
    pub source_id: Option<i64>,
    pub pool_name: Option<String>,
    pub relative_path: Option<String>,
    pub local_path: String,
    pub object_key: String,
    pub file_size: i64,
    pub retry_count: i32,
    pub max_retries: i32,
    pub primary_synced: bool,
    pub mirror_synced: bool,
    pub local_synced: bool,
    pub status: SyncStatus,
    pub last_error: Option<String>,
}

/// Extensions the video conversion job may rewrite to `.mp4`.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v", "3gp", "wmv"];

/// Delay before retrying a video whose converted file has not appeared yet.
pub const VIDEO_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff for transient upload failures, capped at an hour.
pub fn retry_backoff(retry_count: i32) -> Duration {
    let exponent = retry_count.clamp(0, 6) as u32;
    let secs = 60u64.saturating_mul(2u64.pow(exponent));
    Duration::from_secs(secs.min(3600))
}

/// Media object keys shard by thock number: `<thock>/<media-type>_<file>`.
pub fn media_object_key(thock_number: &str, media_type: &str, file_name: &str) -> String {
    format!("{thock_number}/{media_type}_{file_name}")
}

/// Legacy key prefixes accepted on read.
pub fn is_legacy_media_key(key: &str) -> bool {
    key.starts_with("room-entry/") || key.starts_with("gate-pass/")
}

/// Pool keys are `<pool>/<relative-path>` with forward slashes.
pub fn pool_object_key(pool: &str, relative_path: &str) -> String {
    let normalized = relative_path.replace('\\', "/");
    format!("{pool}/{}", normalized.trim_start_matches('/'))
}

/// Directories the scanner never descends into: hidden entries, thumbnail
/// caches and archive junk.
pub fn should_skip_dir(name: &str) -> bool {
    name.starts_with('.') || matches!(name, "thumbs" | "__MACOSX") || name == ".thumbs"
}

/// Files the scanner ignores: hidden and temp-looking entries.
pub fn should_skip_file(name: &str) -> bool {
    if name.starts_with('.') || name.ends_with('~') {
        return true;
    }
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tmp") || lower.ends_with(".part") || lower.ends_with(".swp")
}

fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Whether the path carries an extension from the known video set.
pub fn is_video_path(path: &str) -> bool {
    extension_of(path)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// The `.mp4` sibling the conversion job produces, when the original
/// extension is in the video set and is not already `.mp4`.
pub fn video_fallback_path(path: &str) -> Option<PathBuf> {
    let ext = extension_of(path)?;
    if !VIDEO_EXTENSIONS.contains(&ext.as_str()) || ext == "mp4" {
        return None;
    }
    Some(Path::new(path).with_extension("mp4"))
}

/// Rewrites an object key's extension to match a rewritten upload path.
pub fn rewrite_key_extension(key: &str, new_ext: &str) -> String {
    match key.rfind('.') {
        Some(dot) if !key[dot + 1..].contains('/') => format!("{}.{new_ext}", &key[..dot]),
        _ => format!("{key}.{new_ext}"),
    }
}
