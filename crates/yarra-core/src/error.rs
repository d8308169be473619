//! Error taxonomy for the archival pipeline.

use yarra_store::StoreError;

/// Errors raised while discovering, verifying or archiving studies.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Bad configuration or input (empty bucket name, ...). Never retried.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Storage call failed (transient faults already retried).
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Descriptor could not be fetched or parsed.
    #[error("invalid study descriptor {path}: {reason}")]
    Descriptor { path: String, reason: String },

    /// Expected manifests are missing; the study is still being written.
    #[error("study not ready: {study} (missing {} manifest(s))", missing.len())]
    NotReady { study: String, missing: Vec<String> },

    /// At least one manifest failed its checksum check.
    #[error("checksum verification failed for study {study}: {}", failed.join("; "))]
    VerificationFailed { study: String, failed: Vec<String> },

    /// Deleting this prefix would wipe the bucket root.
    #[error("safety violation: refusing to delete prefix {prefix:?} for study {study}")]
    SafetyViolation { study: String, prefix: String },

    /// Another process holds the study's lease.
    #[error("study {study} is locked by {}", owner.as_deref().unwrap_or("another process"))]
    LockHeld { study: String, owner: Option<String> },

    /// The zip collaborator failed; original data untouched.
    #[error("zip failed for study {study}: {source}")]
    Zip {
        study: String,
        #[source]
        source: anyhow::Error,
    },

    /// A verification task died before reporting.
    #[error("task failed for study {study}: {message}")]
    Task { study: String, message: String },
}

impl ArchiveError {
    /// Errors that must stop the operation outright rather than be treated
    /// as "try again next pass".
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SafetyViolation { .. } | Self::Validation { .. })
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
