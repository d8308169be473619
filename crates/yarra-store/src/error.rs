//! Error types for storage operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to object storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object not found.
    #[error("object not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },

    /// Object already exists (create-only write lost the race).
    #[error("object already exists: {bucket}/{path}")]
    AlreadyExists { bucket: String, path: String },

    /// Access denied to the storage backend.
    #[error("access denied: {message}")]
    AccessDenied { message: String },

    /// Invalid store specification (URL parsing failed).
    #[error("invalid store spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    /// Bucket identifier is empty or malformed. Never retried.
    #[error("invalid bucket name {bucket:?}: {reason}")]
    InvalidBucket { bucket: String, reason: String },

    /// No backend registered under this bucket name.
    #[error("unknown bucket: {bucket}")]
    UnknownBucket { bucket: String },

    /// A prefix delete was asked to remove the whole bucket.
    #[error("refusing to delete prefix {prefix:?} in bucket {bucket}")]
    RefusedPrefix { bucket: String, prefix: String },

    /// Network or I/O error.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Generic error from the underlying object store.
    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),

    /// Other errors.
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Returns true for faults worth retrying (network, server side).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ObjectStore(object_store::Error::Generic { .. })
                | Self::ObjectStore(object_store::Error::JoinError { .. })
        )
    }

    /// Returns true if this error indicates the object was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if a create-only write found an existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Create from object_store error with context about the object.
    pub fn from_object_store(err: object_store::Error, bucket: &str, path: &str) -> Self {
        match &err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            },
            object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
                StoreError::AlreadyExists {
                    bucket: bucket.to_string(),
                    path: path.to_string(),
                }
            }
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => StoreError::AccessDenied {
                message: format!("{}/{}: {}", bucket, path, err),
            },
            _ => StoreError::ObjectStore(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_is_transient() {
        let err = StoreError::Io {
            message: "connection reset".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn validation_errors_are_not_transient() {
        let err = StoreError::InvalidBucket {
            bucket: String::new(),
            reason: "empty".into(),
        };
        assert!(!err.is_transient());
        assert!(!StoreError::NotFound {
            bucket: "sim".into(),
            path: "a/config.json".into()
        }
        .is_transient());
    }

    #[test]
    fn maps_not_found() {
        let err = object_store::Error::NotFound {
            path: "a/b".into(),
            source: "gone".into(),
        };
        let mapped = StoreError::from_object_store(err, "sim", "a/b");
        assert!(mapped.is_not_found());
    }

    #[test]
    fn maps_permission_errors_to_access_denied() {
        let denied = object_store::Error::PermissionDenied {
            path: "a/b".into(),
            source: "403".into(),
        };
        let mapped = StoreError::from_object_store(denied, "sim", "a/b");
        assert!(matches!(mapped, StoreError::AccessDenied { .. }));
        assert!(!mapped.is_transient());

        let unauthenticated = object_store::Error::Unauthenticated {
            path: "a/b".into(),
            source: "401".into(),
        };
        assert!(matches!(
            StoreError::from_object_store(unauthenticated, "sim", "a/b"),
            StoreError::AccessDenied { .. }
        ));
    }
}
