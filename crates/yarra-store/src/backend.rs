//! [`ObjectStorage`] backed by `object_store`.
//!
//! Supports:
//! - S3 and S3-compatible (Backblaze B2, Wasabi, MinIO, R2)
//! - Google Cloud Storage
//! - Local filesystem
//! - In-memory (for testing)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use tracing::debug;

use crate::{validate_bucket, ObjectMeta, ObjectStorage, StoreError, StoreResult, StoreSpec, WriteMode};

/// Registry of named buckets, each served by its own `object_store` backend.
#[derive(Clone, Default)]
pub struct ObjectStoreBackend {
    buckets: HashMap<String, Arc<dyn ObjectStore>>,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.buckets.keys().collect();
        names.sort();
        f.debug_struct("ObjectStoreBackend")
            .field("buckets", &names)
            .finish()
    }
}

impl ObjectStoreBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` under `name`.
    pub fn with_bucket(mut self, name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.buckets.insert(name.into(), store);
        self
    }

    /// Register the backend described by a store URL under `name`.
    pub fn with_spec(self, name: impl Into<String>, url: &str) -> StoreResult<Self> {
        let name = name.into();
        validate_bucket(&name)?;
        let store = StoreSpec::parse(url)?.build()?;
        Ok(self.with_bucket(name, store))
    }

    /// In-memory buckets, one per name.
    pub fn memory<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(Self::new(), |backend, name| {
            backend.with_bucket(name, Arc::new(object_store::memory::InMemory::new()))
        })
    }

    fn bucket(&self, bucket: &str) -> StoreResult<&Arc<dyn ObjectStore>> {
        validate_bucket(bucket)?;
        self.buckets
            .get(bucket)
            .ok_or_else(|| StoreError::UnknownBucket {
                bucket: bucket.to_string(),
            })
    }
}

/// Narrowest `object_store` listing scope that still covers a string prefix.
///
/// `object_store` lists by whole path segments, so `runs/ab` must be listed
/// from `runs/` and filtered afterwards.
fn list_scope(prefix: &str) -> Option<Path> {
    if prefix.ends_with('/') {
        Some(Path::from(prefix))
    } else {
        prefix.rsplit_once('/').map(|(dir, _)| Path::from(dir))
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreBackend {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> StoreResult<Vec<ObjectMeta>> {
        let store = self.bucket(bucket)?;
        let prefix = prefix.filter(|p| !p.is_empty());
        let scope = prefix.and_then(list_scope);

        let entries: Vec<object_store::ObjectMeta> = store
            .list(scope.as_ref())
            .try_collect()
            .await
            .map_err(|e| StoreError::from_object_store(e, bucket, prefix.unwrap_or("")))?;

        let mut metas: Vec<ObjectMeta> = entries
            .into_iter()
            .map(ObjectMeta::from)
            .filter(|m| prefix.map_or(true, |p| m.path.starts_with(p)))
            .collect();
        metas.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(bucket, prefix = prefix.unwrap_or(""), count = metas.len(), "listed objects");
        Ok(metas)
    }

    async fn download(&self, bucket: &str, path: &str) -> StoreResult<Bytes> {
        let store = self.bucket(bucket)?;
        let result = store
            .get(&Path::from(path))
            .await
            .map_err(|e| StoreError::from_object_store(e, bucket, path))?;

        result.bytes().await.map_err(|e| StoreError::Io {
            message: format!("failed to read {}/{}: {}", bucket, path, e),
        })
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        mode: WriteMode,
    ) -> StoreResult<()> {
        let store = self.bucket(bucket)?;
        let opts = PutOptions {
            mode: match mode {
                WriteMode::Create => PutMode::Create,
                WriteMode::Overwrite => PutMode::Overwrite,
                WriteMode::Update { e_tag, version } => {
                    PutMode::Update(UpdateVersion { e_tag, version })
                }
            },
            ..Default::default()
        };

        store
            .put_opts(&Path::from(path), PutPayload::from_bytes(bytes), opts)
            .await
            .map_err(|e| StoreError::from_object_store(e, bucket, path))?;
        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str, force: bool) -> StoreResult<usize> {
        if prefix.is_empty() || prefix == "/" {
            return Err(StoreError::RefusedPrefix {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            });
        }
        let store = self.bucket(bucket)?;
        let targets = self.list(bucket, Some(prefix)).await?;

        let mut deleted = 0;
        let mut first_error = None;
        for target in &targets {
            match store.delete(&Path::from(target.path.as_str())).await {
                Ok(()) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => {
                    let err = StoreError::from_object_store(e, bucket, &target.path);
                    if !force {
                        return Err(err);
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(bucket, prefix, deleted, "deleted prefix");
        match first_error {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> StoreResult<()> {
        let store = self.bucket(bucket)?;
        match store.delete(&Path::from(path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::from_object_store(e, bucket, path)),
        }
    }
}
