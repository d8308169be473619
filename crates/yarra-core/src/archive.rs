//! Archival of verified studies: lock, zip, then delete.
//!
//! Ordering is the safety property here. Nothing is deleted unless the zip
//! of that same prefix succeeded, and any failure before the delete leaves
//! the study untouched for a later pass.

use std::sync::Arc;

use tracing::{info, warn};
use yarra_store::{LockOutcome, LockService, ObjectStorage};

use crate::config::BucketRoles;
use crate::error::ArchiveError;
use crate::verify::VerifiedStudy;
use crate::zipper::{ZipReport, ZipRequest, Zipper};

/// Result of archiving one study.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub study: String,
    pub archive: ZipReport,
    /// Source objects removed after the zip.
    pub deleted: usize,
}

/// Zips a verified study into the study bucket and removes the original.
#[derive(Clone)]
pub struct ArchiveExecutor {
    storage: Arc<dyn ObjectStorage>,
    zipper: Arc<dyn Zipper>,
    locks: Arc<dyn LockService>,
    buckets: BucketRoles,
}

impl ArchiveExecutor {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        zipper: Arc<dyn Zipper>,
        locks: Arc<dyn LockService>,
        buckets: BucketRoles,
    ) -> Self {
        Self {
            storage,
            zipper,
            locks,
            buckets,
        }
    }

    pub async fn archive(&self, verified: &VerifiedStudy) -> Result<ArchiveReport, ArchiveError> {
        let study = verified.descriptor();
        let prefix = study.source_prefix();

        let to_path = match study.archive_path() {
            Some(path) if !study.is_root() => path,
            _ => {
                warn!(study = %study, prefix, "refusing to archive bucket root");
                return Err(ArchiveError::SafetyViolation {
                    study: study.to_string(),
                    prefix: prefix.to_string(),
                });
            }
        };

        let lease = match self.locks.acquire(&self.buckets.lock, study.lock_key()).await? {
            LockOutcome::Acquired(lease) => lease,
            LockOutcome::AlreadyHeld { owner, .. } => {
                return Err(ArchiveError::LockHeld {
                    study: study.to_string(),
                    owner,
                })
            }
        };

        let request = ZipRequest {
            from_bucket: self.buckets.sim.clone(),
            from_path: prefix.to_string(),
            to_bucket: self.buckets.study.clone(),
            to_path,
        };
        // On failure the lease is left to expire so no other process
        // retries this study before the TTL.
        let archive = self
            .zipper
            .zip_directory(&request)
            .await
            .map_err(|source| ArchiveError::Zip {
                study: study.to_string(),
                source,
            })?;

        let deleted = self
            .storage
            .delete_prefix(&self.buckets.sim, prefix, true)
            .await?;
        // The study is gone from the source now; a stuck marker only waits
        // out its TTL.
        if let Err(e) = self.locks.release(&lease).await {
            warn!(study = %study, key = %lease.key, error = %e, "failed to release lock after archive");
        }

        info!(study = %study, archive = %archive.archive, deleted, "zipped and deleted");
        Ok(ArchiveReport {
            study: study.to_string(),
            archive,
            deleted,
        })
    }
}
