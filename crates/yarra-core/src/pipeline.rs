//! One archival pass over the source bucket.
//!
//! list → discover → verify (concurrent) → archive (one at a time).
//!
//! Per-study failures are recorded in the [`PassSummary`] and never abort
//! the pass. Only invalid configuration or a failed source listing stops a
//! pass before any study is touched.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use yarra_store::{LockService, ObjectLock, ObjectStorage, RetryingStorage};

use crate::archive::{ArchiveExecutor, ArchiveReport};
use crate::config::{BucketRoles, PipelineConfig};
use crate::discovery::discover_studies;
use crate::error::ArchiveError;
use crate::listing::{DirectoryLister, ObjectListing};
use crate::naming::StudyDescriptor;
use crate::progress::{emit, tracing_sink, ProgressEvent, ProgressSink};
use crate::verify::{ChecksumVerifier, Md5ManifestVerifier, ReadinessChecker, VerificationResult};
use crate::zipper::{ObjectStoreZipper, Zipper};

/// Terminal state of one study after a pass.
#[derive(Debug)]
pub enum StudyState {
    NotReady { missing: Vec<String> },
    /// Verification failed; data untouched.
    Failed(ArchiveError),
    Archived(ArchiveReport),
    /// Verified but archival did not complete. The source is untouched
    /// unless the delete step itself failed.
    ArchiveFailed(ArchiveError),
}

#[derive(Debug)]
pub struct StudyOutcome {
    pub study: StudyDescriptor,
    pub state: StudyState,
}

/// Everything that happened in one pass, in discovery order.
#[derive(Debug, Default)]
pub struct PassSummary {
    /// Objects in the source listing.
    pub listed: usize,
    pub outcomes: Vec<StudyOutcome>,
}

impl PassSummary {
    pub fn discovered(&self) -> usize {
        self.outcomes.len()
    }

    pub fn archived(&self) -> impl Iterator<Item = &StudyOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, StudyState::Archived(_)))
    }

    pub fn not_ready(&self) -> impl Iterator<Item = &StudyOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.state, StudyState::NotReady { .. }))
    }

    /// Verification failures and archive failures.
    pub fn failures(&self) -> impl Iterator<Item = &StudyOutcome> {
        self.outcomes.iter().filter(|o| {
            matches!(
                o.state,
                StudyState::Failed(_) | StudyState::ArchiveFailed(_)
            )
        })
    }

    pub fn state_of(&self, study: &str) -> Option<&StudyState> {
        self.outcomes
            .iter()
            .find(|o| o.study.as_str() == study)
            .map(|o| &o.state)
    }
}

/// The archival pipeline, configured for one set of bucket roles.
#[derive(Clone)]
pub struct Pipeline {
    storage: Arc<dyn ObjectStorage>,
    verifier: Arc<dyn ChecksumVerifier>,
    zipper: Arc<dyn Zipper>,
    locks: Arc<dyn LockService>,
    config: PipelineConfig,
    progress: Option<ProgressSink>,
}

impl Pipeline {
    /// Assemble a pipeline from explicit collaborators.
    ///
    /// `storage` is used as given; wrap it in [`RetryingStorage`] yourself
    /// or use [`Pipeline::from_storage`].
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        verifier: Arc<dyn ChecksumVerifier>,
        zipper: Arc<dyn Zipper>,
        locks: Arc<dyn LockService>,
        config: PipelineConfig,
    ) -> Result<Self, ArchiveError> {
        config.validate()?;
        let progress = config.progress.then(tracing_sink);
        Ok(Self {
            storage,
            verifier,
            zipper,
            locks,
            config,
            progress,
        })
    }

    /// Default collaborators over one storage backend: retrying storage,
    /// md5 manifests, in-memory zipping and marker-object leases.
    pub fn from_storage<S>(storage: S, config: PipelineConfig) -> Result<Self, ArchiveError>
    where
        S: ObjectStorage + 'static,
    {
        config.validate()?;
        let storage: Arc<dyn ObjectStorage> =
            Arc::new(RetryingStorage::new(storage, config.retry.clone()));
        let locks = Arc::new(ObjectLock::new(storage.clone(), config.lock_ttl()));
        Self::new(
            storage.clone(),
            Arc::new(Md5ManifestVerifier::new(storage.clone())),
            Arc::new(ObjectStoreZipper::new(storage)),
            locks,
            config,
        )
    }

    /// A new pipeline sharing collaborators but using other bucket roles.
    pub fn with_buckets(&self, buckets: BucketRoles) -> Result<Self, ArchiveError> {
        buckets.validate()?;
        let mut rebound = self.clone();
        rebound.config = self.config.clone().with_buckets(buckets);
        Ok(rebound)
    }

    /// Send progress events to `sink` (also turns progress on).
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.config.progress = true;
        self.progress = Some(sink);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn buckets(&self) -> &BucketRoles {
        &self.config.buckets
    }

    pub fn lister(&self) -> DirectoryLister {
        DirectoryLister::new(self.storage.clone())
    }

    pub fn readiness(&self) -> ReadinessChecker {
        ReadinessChecker::new(
            self.storage.clone(),
            self.verifier.clone(),
            self.config.buckets.sim.clone(),
        )
        .with_progress(self.progress.clone())
    }

    pub fn executor(&self) -> ArchiveExecutor {
        ArchiveExecutor::new(
            self.storage.clone(),
            self.zipper.clone(),
            self.locks.clone(),
            self.config.buckets.clone(),
        )
    }

    /// Run one full pass.
    pub async fn run_pass(&self) -> Result<PassSummary, ArchiveError> {
        self.config.validate()?;
        let sim = self.config.buckets.sim.as_str();

        let listing = Arc::new(self.lister().list(sim, None).await?);
        emit(self.progress.as_ref(), || ProgressEvent::Listed {
            bucket: sim.to_string(),
            objects: listing.len(),
        });

        let studies = discover_studies(&listing);
        info!(bucket = sim, objects = listing.len(), studies = studies.len(), "pass started");
        emit(self.progress.as_ref(), || ProgressEvent::Discovered {
            studies: studies.len(),
        });

        let verdicts = self.verify_all(listing.clone(), &studies).await;

        let mut states: Vec<Option<StudyState>> = Vec::with_capacity(studies.len());
        let mut verified = Vec::new();
        for (index, (study, verdict)) in studies.iter().zip(verdicts).enumerate() {
            emit(self.progress.as_ref(), || ProgressEvent::Classified {
                study: study.to_string(),
                verdict: verdict.label().to_string(),
            });
            states.push(match verdict {
                VerificationResult::Verified(v) => {
                    verified.push((index, v));
                    None
                }
                VerificationResult::NotReady { missing } => Some(StudyState::NotReady { missing }),
                VerificationResult::Failed(e) => Some(StudyState::Failed(e)),
            });
        }

        // Strictly one study at a time.
        let executor = self.executor();
        for (index, study) in verified {
            let name = study.descriptor().to_string();
            emit(self.progress.as_ref(), || ProgressEvent::Archiving {
                study: name.clone(),
            });
            let state = match executor.archive(&study).await {
                Ok(report) => {
                    emit(self.progress.as_ref(), || ProgressEvent::Archived {
                        study: name.clone(),
                        archive: report.archive.archive.clone(),
                        deleted: report.deleted,
                    });
                    StudyState::Archived(report)
                }
                Err(e) => {
                    if e.is_fatal() {
                        error!(study = %name, error = %e, "archive refused");
                    } else {
                        warn!(study = %name, error = %e, "error processing study");
                    }
                    emit(self.progress.as_ref(), || ProgressEvent::ArchiveFailed {
                        study: name.clone(),
                        error: e.to_string(),
                    });
                    StudyState::ArchiveFailed(e)
                }
            };
            states[index] = Some(state);
        }

        let outcomes: Vec<StudyOutcome> = studies
            .into_iter()
            .zip(states)
            .filter_map(|(study, state)| state.map(|state| StudyOutcome { study, state }))
            .collect();
        let summary = PassSummary {
            listed: listing.len(),
            outcomes,
        };

        let (archived, not_ready, failed) = (
            summary.archived().count(),
            summary.not_ready().count(),
            summary.failures().count(),
        );
        info!(archived, not_ready, failed, "pass complete");
        emit(self.progress.as_ref(), || ProgressEvent::PassComplete {
            archived,
            not_ready,
            failed,
        });
        Ok(summary)
    }

    /// Verify every study with bounded concurrency. Results come back in
    /// the order of `studies`.
    async fn verify_all(
        &self,
        listing: Arc<ObjectListing>,
        studies: &[StudyDescriptor],
    ) -> Vec<VerificationResult> {
        let sem = Arc::new(Semaphore::new(self.config.verify_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (index, study) in studies.iter().cloned().enumerate() {
            let checker = self.readiness();
            let listing = listing.clone();
            let sem = sem.clone();
            join_set.spawn(async move {
                let result = match sem.acquire_owned().await {
                    Ok(_permit) => checker.check(&study, &listing).await,
                    Err(e) => VerificationResult::Failed(ArchiveError::Task {
                        study: study.to_string(),
                        message: e.to_string(),
                    }),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<VerificationResult>> =
            std::iter::repeat_with(|| None).take(studies.len()).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(error = %e, "verification task panicked"),
            }
        }

        results
            .into_iter()
            .zip(studies)
            .map(|(result, study)| {
                result.unwrap_or_else(|| {
                    VerificationResult::Failed(ArchiveError::Task {
                        study: study.to_string(),
                        message: "verification task did not complete".into(),
                    })
                })
            })
            .collect()
    }
}
