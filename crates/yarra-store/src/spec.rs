//! Store specifications: which backend serves a named bucket.
//!
//! # Examples
//!
//! ```text
//! s3://sim-staging?region=us-west-2
//! gs://study-archive/zips
//! file:///var/lib/yarra/lock
//! memory://sim        (for testing)
//! ```

use std::sync::Arc;

use object_store::ObjectStore;

use crate::error::{StoreError, StoreResult};

/// Parsed store specification from config.
#[derive(Debug, Clone)]
pub struct StoreSpec {
    /// The scheme (s3, gs, file, memory)
    pub scheme: String,
    /// Bucket or container name (empty for file://)
    pub bucket: Option<String>,
    /// Base prefix/path within the bucket
    pub prefix: String,
    /// Optional region (for S3)
    pub region: Option<String>,
}

impl StoreSpec {
    /// Parse a store URL like `s3://bucket/prefix` or `file:///path`.
    pub fn parse(url: &str) -> StoreResult<Self> {
        let url = url::Url::parse(url).map_err(|e| StoreError::InvalidSpec {
            spec: url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = url.scheme().to_string();
        let bucket = url.host_str().map(|s| s.to_string());
        let prefix = url.path().trim_start_matches('/').to_string();

        let region = url
            .query_pairs()
            .find(|(k, _)| k == "region")
            .map(|(_, v)| v.to_string());

        Ok(Self {
            scheme,
            bucket,
            prefix,
            region,
        })
    }

    /// Check if this is a memory store (for testing).
    pub fn is_memory(&self) -> bool {
        self.scheme == "memory"
    }

    /// Check if this is a local file store.
    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }

    /// Build the backend this spec points at.
    pub fn build(&self) -> StoreResult<Arc<dyn ObjectStore>> {
        let inner: Arc<dyn ObjectStore> = match self.scheme.as_str() {
            "memory" => Arc::new(object_store::memory::InMemory::new()),
            "file" => {
                let path = if let Some(bucket) = &self.bucket {
                    format!("/{}/{}", bucket, self.prefix)
                } else {
                    format!("/{}", self.prefix)
                };
                std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
                    message: format!("failed to create store directory {}: {}", path, e),
                })?;
                Arc::new(
                    object_store::local::LocalFileSystem::new_with_prefix(&path).map_err(|e| {
                        StoreError::Io {
                            message: format!("failed to create local store at {}: {}", path, e),
                        }
                    })?,
                )
            }
            "s3" => {
                let bucket = self.require_bucket()?;
                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_allow_http(false);
                if let Some(region) = &self.region {
                    builder = builder.with_region(region);
                }
                let store: Arc<dyn ObjectStore> =
                    Arc::new(builder.build().map_err(|e| StoreError::Io {
                        message: format!("failed to create S3 client: {}", e),
                    })?);
                self.with_prefix(store)
            }
            "gs" => {
                let bucket = self.require_bucket()?;
                let store: Arc<dyn ObjectStore> = Arc::new(
                    object_store::gcp::GoogleCloudStorageBuilder::from_env()
                        .with_bucket_name(bucket)
                        .build()
                        .map_err(|e| StoreError::Io {
                            message: format!("failed to create GCS client: {}", e),
                        })?,
                );
                self.with_prefix(store)
            }
            scheme => {
                return Err(StoreError::InvalidSpec {
                    spec: self.scheme.clone(),
                    reason: format!("unsupported scheme: {}", scheme),
                })
            }
        };
        Ok(inner)
    }

    fn require_bucket(&self) -> StoreResult<&str> {
        self.bucket
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| StoreError::InvalidSpec {
                spec: format!("{}://{}", self.scheme, self.prefix),
                reason: "URL must include bucket name".to_string(),
            })
    }

    fn with_prefix(&self, store: Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore> {
        if self.prefix.is_empty() {
            store
        } else {
            Arc::new(object_store::prefix::PrefixStore::new(
                store,
                self.prefix.as_str(),
            ))
        }
    }
}
