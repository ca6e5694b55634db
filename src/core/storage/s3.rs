// src/core/storage/s3.rs

//! S3-compatible backend. Configured with an endpoint URL, a region
//! (default "auto"), path-style addressing and static credentials, so it
//! works against MinIO-style stores as well as AWS itself.

use super::{Download, ListEntry, ObjectMeta, ObjectStore, StoreBody, sort_listing};
use crate::config::S3BackendConfig;
use crate::core::errors::ColdStoreError;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use chrono::{DateTime, Utc};

/// S3 DeleteObjects accepts at most this many keys per request.
const MAX_KEYS_PER_DELETE: usize = 1000;

pub struct S3Store {
    name: String,
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Builds a client from static credentials. No ambient AWS environment
    /// is consulted.
    pub fn new(name: impl Into<String>, cfg: &S3BackendConfig) -> Result<Self, ColdStoreError> {
        let secret_key = cfg.secret_key.as_deref().ok_or_else(|| {
            ColdStoreError::Config(format!("object store '{}' has no secret key", cfg.bucket))
        })?;
        let credentials = Credentials::new(
            cfg.access_key.clone(),
            secret_key.to_string(),
            None,
            None,
            "coldstored-static",
        );
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .endpoint_url(cfg.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(cfg.path_style)
            .build();
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config),
            bucket: cfg.bucket.clone(),
        })
    }

    fn store_err(&self, op: &str, e: impl std::fmt::Debug + std::fmt::Display) -> ColdStoreError {
        ColdStoreError::ObjectStore(format!("{} {op} failed: {e}", self.name))
    }

    /// Deletes every object under a prefix using batched DeleteObjects.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), ColdStoreError> {
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| self.store_err("list", DisplayErrorContext(&e)))?;

            let keys: Vec<String> = response
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(str::to_string))
                .collect();

            for batch in keys.chunks(MAX_KEYS_PER_DELETE) {
                let objects: Vec<ObjectIdentifier> = batch
                    .iter()
                    .map(|key| {
                        ObjectIdentifier::builder()
                            .key(key)
                            .build()
                            .map_err(|e| self.store_err("delete", e))
                    })
                    .collect::<Result<_, _>>()?;
                let delete = Delete::builder()
                    .set_objects(Some(objects))
                    .build()
                    .map_err(|e| self.store_err("delete", e))?;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| self.store_err("delete", DisplayErrorContext(&e)))?;
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => return Ok(()),
            }
        }
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, ColdStoreError> {
        let mut dir_prefix = prefix.to_string();
        if !dir_prefix.is_empty() && !dir_prefix.ends_with('/') {
            dir_prefix.push('/');
        }

        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&dir_prefix)
                .delimiter("/");
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| self.store_err("list", DisplayErrorContext(&e)))?;

            for common in response.common_prefixes() {
                if let Some(full) = common.prefix() {
                    let name = full
                        .strip_prefix(&dir_prefix)
                        .unwrap_or(full)
                        .trim_end_matches('/')
                        .to_string();
                    entries.push(ListEntry {
                        name,
                        is_dir: true,
                        size: 0,
                        last_modified: None,
                    });
                }
            }
            for object in response.contents() {
                let Some(full) = object.key() else { continue };
                if full == dir_prefix {
                    continue;
                }
                entries.push(ListEntry {
                    name: full.strip_prefix(&dir_prefix).unwrap_or(full).to_string(),
                    is_dir: false,
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        sort_listing(&mut entries);
        Ok(entries)
    }

    async fn list_recursive(&self, prefix: &str) -> Result<Vec<ObjectMeta>, ColdStoreError> {
        let mut results = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| self.store_err("list", DisplayErrorContext(&e)))?;
            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                results.push(ObjectMeta {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }
            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(results)
    }

    async fn download(&self, key: &str) -> Result<Download, ColdStoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()) == Some(true) {
                    ColdStoreError::NotFound(format!("object '{key}'"))
                } else {
                    self.store_err("download", DisplayErrorContext(&e))
                }
            })?;
        let size = response.content_length().unwrap_or(0).max(0) as u64;
        Ok(Download {
            reader: Box::new(response.body.into_async_read()),
            size,
        })
    }

    async fn upload(&self, key: &str, body: StoreBody) -> Result<(), ColdStoreError> {
        let stream = match body {
            StoreBody::Bytes(bytes) => ByteStream::from(bytes),
            StoreBody::File(path) => ByteStream::from_path(&path)
                .await
                .map_err(|e| self.store_err("upload", e))?,
        };
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(stream)
            .send()
            .await
            .map_err(|e| self.store_err("upload", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ColdStoreError> {
        if key.ends_with('/') {
            return self.delete_prefix(key).await;
        }
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.store_err("delete", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta, ColdStoreError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_not_found()) == Some(true) {
                    ColdStoreError::NotFound(format!("object '{key}'"))
                } else {
                    self.store_err("stat", DisplayErrorContext(&e))
                }
            })?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: response.last_modified().and_then(to_chrono),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, ColdStoreError> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(ColdStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// S3 has no rename: copy, then delete the source.
    async fn move_object(&self, src: &str, dst: &str) -> Result<(), ColdStoreError> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, src))
            .key(dst)
            .send()
            .await
            .map_err(|e| self.store_err("copy", DisplayErrorContext(&e)))?;
        self.delete(src).await
    }
}
