//! Object storage access for the yarra study archiver.
//!
//! This crate is the storage seam of the pipeline:
//!
//! - [`ObjectStorage`]: bucket-addressed list/download/put/delete primitives
//! - [`ObjectStoreBackend`]: implementation over the `object_store` crate
//!   (S3, GCS, local filesystem, in-memory)
//! - [`RetryingStorage`]: exponential backoff with jitter for transient faults
//! - [`LockService`] / [`ObjectLock`]: TTL-bounded leases stored as marker objects
//!
//! Buckets are addressed by name; a backend registry maps each name to a
//! concrete store, so the same code path serves production and tests.

pub mod backend;
pub mod error;
pub mod lock;
pub mod retry;
pub mod spec;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub use backend::ObjectStoreBackend;
pub use error::{StoreError, StoreResult};
pub use lock::{LockLease, LockOutcome, LockService, ObjectLock, DEFAULT_LOCK_TTL};
pub use retry::{RetryPolicy, RetryingStorage};
pub use spec::StoreSpec;

/// Metadata for one listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Full object path within the bucket.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modified timestamp (if known).
    pub last_modified: Option<DateTime<Utc>>,
    /// Backend entity tag (if any).
    pub e_tag: Option<String>,
    /// Backend object version (if any).
    pub version: Option<String>,
}

impl From<object_store::ObjectMeta> for ObjectMeta {
    fn from(meta: object_store::ObjectMeta) -> Self {
        Self {
            path: meta.location.to_string(),
            size: meta.size as u64,
            last_modified: Some(meta.last_modified),
            e_tag: meta.e_tag,
            version: meta.version,
        }
    }
}

/// Write semantics for [`ObjectStorage::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with [`StoreError::AlreadyExists`] if the object is present.
    Create,
    /// Replace whatever is there.
    Overwrite,
    /// Replace the object only if it is still at this `e_tag`/`version`.
    /// A mismatch fails with [`StoreError::AlreadyExists`].
    Update {
        e_tag: Option<String>,
        version: Option<String>,
    },
}

/// Bucket-addressed object storage.
///
/// Every operation takes the bucket name first. Implementations reject an
/// empty or malformed bucket name with [`StoreError::InvalidBucket`] before
/// doing any I/O.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// List objects in `bucket` whose path starts with `prefix` (all objects
    /// when `prefix` is `None`), ordered by path.
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> StoreResult<Vec<ObjectMeta>>;

    /// Download one object.
    async fn download(&self, bucket: &str, path: &str) -> StoreResult<Bytes>;

    /// Upload one object.
    async fn put(&self, bucket: &str, path: &str, bytes: Bytes, mode: WriteMode)
        -> StoreResult<()>;

    /// Delete every object under `prefix`. With `force`, keeps going past
    /// individual failures and reports the first one at the end.
    ///
    /// Returns the number of objects deleted.
    async fn delete_prefix(&self, bucket: &str, prefix: &str, force: bool) -> StoreResult<usize>;

    /// Delete one object. Deleting a missing object is not an error.
    async fn delete_object(&self, bucket: &str, path: &str) -> StoreResult<()>;
}

#[async_trait]
impl<T: ObjectStorage + ?Sized> ObjectStorage for Arc<T> {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> StoreResult<Vec<ObjectMeta>> {
        (**self).list(bucket, prefix).await
    }

    async fn download(&self, bucket: &str, path: &str) -> StoreResult<Bytes> {
        (**self).download(bucket, path).await
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        mode: WriteMode,
    ) -> StoreResult<()> {
        (**self).put(bucket, path, bytes, mode).await
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str, force: bool) -> StoreResult<usize> {
        (**self).delete_prefix(bucket, prefix, force).await
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> StoreResult<()> {
        (**self).delete_object(bucket, path).await
    }
}

/// Reject empty or malformed bucket identifiers.
pub fn validate_bucket(bucket: &str) -> StoreResult<()> {
    let reason = if bucket.is_empty() {
        "zero length bucket name"
    } else if bucket.trim() != bucket {
        "leading or trailing whitespace"
    } else if bucket.contains('/') {
        "bucket name must not contain '/'"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidBucket {
        bucket: bucket.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_bucket_rejects_empty() {
        assert!(matches!(
            validate_bucket(""),
            Err(StoreError::InvalidBucket { .. })
        ));
    }

    #[test]
    fn validate_bucket_rejects_slash_and_padding() {
        assert!(validate_bucket("a/b").is_err());
        assert!(validate_bucket(" sim").is_err());
        assert!(validate_bucket("sim-staging").is_ok());
    }
}
