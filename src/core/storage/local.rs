// src/core/storage/local.rs

//! Local filesystem backend. Every key must resolve inside the configured
//! root after normalisation; traversal or absolute segments are rejected.

use super::{Download, ListEntry, ObjectMeta, ObjectStore, StoreBody, sort_listing};
use crate::core::errors::ColdStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub struct LocalStore {
    name: String,
    root: PathBuf,
}

impl LocalStore {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalises a key and joins it onto the root. Keys containing `..`,
    /// absolute segments, or drive prefixes escape the jail and are rejected.
    pub fn resolve(&self, key: &str) -> Result<PathBuf, ColdStoreError> {
        let trimmed = key.trim_end_matches('/');
        let candidate = Path::new(trimmed);
        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ColdStoreError::PathEscape(key.to_string()));
                }
            }
        }
        if !resolved.starts_with(&self.root) {
            return Err(ColdStoreError::PathEscape(key.to_string()));
        }
        Ok(resolved)
    }
}

fn mtime_of(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, ColdStoreError> {
        let dir = self.resolve(prefix)?;
        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(ListEntry {
                name,
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                last_modified: mtime_of(&metadata),
            });
        }
        sort_listing(&mut entries);
        Ok(entries)
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Vec<ObjectMeta>, ColdStoreError> {
        let root = self.resolve(prefix)?;
        let base = prefix.trim_end_matches('/');
        let mut results = Vec::new();
        let mut stack = vec![(root, base.to_string())];
        while let Some((dir, key_prefix)) = stack.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let metadata = entry.metadata().await?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if key_prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{key_prefix}/{name}")
                };
                if metadata.is_dir() {
                    stack.push((entry.path(), key));
                } else {
                    results.push(ObjectMeta {
                        key,
                        size: metadata.len(),
                        last_modified: mtime_of(&metadata),
                    });
                }
            }
        }
        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }

    async fn download(&self, key: &str) -> Result<Download, ColdStoreError> {
        let path = self.resolve(key)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ColdStoreError::NotFound(format!("object '{key}'"))
            } else {
                e.into()
            }
        })?;
        let file = tokio::fs::File::open(&path).await?;
        Ok(Download {
            reader: Box::new(file),
            size: metadata.len(),
        })
    }

    async fn upload(&self, key: &str, body: StoreBody) -> Result<(), ColdStoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match body {
            StoreBody::Bytes(bytes) => {
                let mut file = tokio::fs::File::create(&path).await?;
                file.write_all(&bytes).await?;
                file.flush().await?;
            }
            StoreBody::File(source) => {
                tokio::fs::copy(&source, &path).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ColdStoreError> {
        let path = self.resolve(key)?;
        let result = if key.ends_with('/') {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta, ColdStoreError> {
        let path = self.resolve(key)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ColdStoreError::NotFound(format!("object '{key}'"))
            } else {
                e.into()
            }
        })?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: metadata.len(),
            last_modified: mtime_of(&metadata),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, ColdStoreError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<(), ColdStoreError> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&from, &to).await?;
        Ok(())
    }
}
