// src/core/storage/mod.rs

//! A uniform object-store abstraction over a local filesystem root and
//! S3-compatible endpoints.
//!
//! [`ObjectStore`] is a CRUD-like trait with two implementations:
//!   * [`local::LocalStore`] stores objects under a jailed directory root
//!   * [`s3::S3Store`] talks to any S3-compatible endpoint
//!
//! [`ObjectBackend`] wraps the two so they are interchangeable at
//! configuration time. Cross-backend helpers stream through a spool file
//! so whole objects are never held in memory.

pub mod local;
pub mod s3;

use crate::core::errors::ColdStoreError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWriteExt};

pub use local::LocalStore;
pub use s3::S3Store;

/// One entry returned by a prefix listing. Directory entries come first,
/// then files, each group sorted by name, for UI stability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Path of the entry relative to the listed prefix.
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Metadata for a single object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The body of an upload. `File` streams from disk without buffering the
/// whole object.
#[derive(Debug, Clone)]
pub enum StoreBody {
    Bytes(Bytes),
    File(PathBuf),
}

impl StoreBody {
    pub async fn len(&self) -> Result<u64, ColdStoreError> {
        match self {
            StoreBody::Bytes(b) => Ok(b.len() as u64),
            StoreBody::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }
}

/// A streaming download: the reader plus the object size.
pub struct Download {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
}

/// The polymorphic capability set shared by every backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// A human-readable backend name for logs and fallback reporting.
    fn name(&self) -> &str;

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, ColdStoreError>;

    /// Lists every object under a prefix, recursing into sub-prefixes.
    async fn list_recursive(&self, prefix: &str) -> Result<Vec<ObjectMeta>, ColdStoreError>;

    async fn download(&self, key: &str) -> Result<Download, ColdStoreError>;

    async fn upload(&self, key: &str, body: StoreBody) -> Result<(), ColdStoreError>;

    /// Deletes a key. Keys ending in `/` delete the whole prefix.
    async fn delete(&self, key: &str) -> Result<(), ColdStoreError>;

    async fn stat(&self, key: &str) -> Result<ObjectMeta, ColdStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, ColdStoreError>;

    async fn move_object(&self, src: &str, dst: &str) -> Result<(), ColdStoreError>;
}

/// Every backend currently supported. Serves as a simple way to pass
/// around an [`ObjectStore`] without dealing with generics.
pub enum ObjectBackend {
    Local(LocalStore),
    S3(S3Store),
}

#[async_trait]
impl ObjectStore for ObjectBackend {
    fn name(&self) -> &str {
        match self {
            ObjectBackend::Local(inner) => inner.name(),
            ObjectBackend::S3(inner) => inner.name(),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, ColdStoreError> {
        match self {
            ObjectBackend::Local(inner) => inner.list(prefix).await,
            ObjectBackend::S3(inner) => inner.list(prefix).await,
        }
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Vec<ObjectMeta>, ColdStoreError> {
        match self {
            ObjectBackend::Local(inner) => inner.list_recursive(prefix).await,
            ObjectBackend::S3(inner) => inner.list_recursive(prefix).await,
        }
    }

    async fn download(&self, key: &str) -> Result<Download, ColdStoreError> {
        match self {
            ObjectBackend::Local(inner) => inner.download(key).await,
            ObjectBackend::S3(inner) => inner.download(key).await,
        }
    }

    async fn upload(&self, key: &str, body: StoreBody) -> Result<(), ColdStoreError> {
        match self {
            ObjectBackend::Local(inner) => inner.upload(key, body).await,
            ObjectBackend::S3(inner) => inner.upload(key, body).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ColdStoreError> {
        match self {
            ObjectBackend::Local(inner) => inner.delete(key).await,
            ObjectBackend::S3(inner) => inner.delete(key).await,
        }
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta, ColdStoreError> {
        match self {
            ObjectBackend::Local(inner) => inner.stat(key).await,
            ObjectBackend::S3(inner) => inner.stat(key).await,
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, ColdStoreError> {
        match self {
            ObjectBackend::Local(inner) => inner.exists(key).await,
            ObjectBackend::S3(inner) => inner.exists(key).await,
        }
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<(), ColdStoreError> {
        match self {
            ObjectBackend::Local(inner) => inner.move_object(src, dst).await,
            ObjectBackend::S3(inner) => inner.move_object(src, dst).await,
        }
    }
}

/// Writes a download to a local file, creating parent directories. The
/// partial file is removed on failure.
pub async fn download_to_file(
    backend: &ObjectBackend,
    key: &str,
    path: &std::path::Path,
) -> Result<u64, ColdStoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut download = backend.download(key).await?;
    let mut file = tokio::fs::File::create(path).await?;
    match tokio::io::copy(&mut download.reader, &mut file).await {
        Ok(written) => {
            file.flush().await?;
            Ok(written)
        }
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(path).await;
            Err(e.into())
        }
    }
}

fn spool_path() -> PathBuf {
    std::env::temp_dir().join(format!("coldstored-spool-{}", uuid::Uuid::new_v4()))
}

/// Copies an object between two backends, spooling through a temp file so
/// the whole object is never resident in memory.
pub async fn transfer(
    src: &ObjectBackend,
    src_key: &str,
    dst: &ObjectBackend,
    dst_key: &str,
) -> Result<(), ColdStoreError> {
    let spool = spool_path();
    download_to_file(src, src_key, &spool).await?;
    let result = dst.upload(dst_key, StoreBody::File(spool.clone())).await;
    let _ = tokio::fs::remove_file(&spool).await;
    result
}

/// Moves an object between two backends: copy, then delete the source.
pub async fn move_across(
    src: &ObjectBackend,
    src_key: &str,
    dst: &ObjectBackend,
    dst_key: &str,
) -> Result<(), ColdStoreError> {
    transfer(src, src_key, dst, dst_key).await?;
    src.delete(src_key).await
}

/// Tries each backend in order, returning the first successful download
/// plus the name of the backend that served it.
pub async fn download_with_fallback(
    key: &str,
    backends: &[&ObjectBackend],
) -> Result<(Download, String), ColdStoreError> {
    let mut last_err = ColdStoreError::NotFound(format!("object '{key}'"));
    for backend in backends {
        match backend.download(key).await {
            Ok(download) => return Ok((download, backend.name().to_string())),
            Err(e) => {
                tracing::debug!(backend = backend.name(), key, error = %e, "fallback download miss");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Orders listing entries: directories first, then files, each sorted by name.
pub fn sort_listing(entries: &mut [ListEntry]) {
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
}
