//! Verify-then-archive pipeline for staged simulation studies.
//!
//! A study is a prefix in the source ("sim") bucket holding a
//! `config.json` descriptor plus one `{i}/md5.json` checksum manifest per
//! configuration. Each pass:
//!
//! 1. lists the sim bucket and discovers descriptors,
//! 2. verifies every study concurrently (all manifests present, all
//!    checksums pass),
//! 3. archives verified studies one at a time: lease, zip into the study
//!    bucket, delete the original prefix and the lease marker.
//!
//! Failures are isolated per study and reported in a [`PassSummary`].
//!
//! # Quick Start
//!
//! ```no_run
//! use yarra_core::{BucketRoles, Pipeline, PipelineConfig};
//! use yarra_store::ObjectStoreBackend;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = ObjectStoreBackend::new()
//!     .with_spec("sim", "gs://sim-staging")?
//!     .with_spec("study", "gs://study-archive")?
//!     .with_spec("lock", "gs://yarra-lock")?;
//! let config = PipelineConfig::new(BucketRoles::new("sim", "study", "lock")?);
//!
//! let summary = Pipeline::from_storage(backend, config)?.run_pass().await?;
//! println!("archived {} studies", summary.archived().count());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod discovery;
pub mod error;
pub mod listing;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod verify;
pub mod zipper;

pub use archive::{ArchiveExecutor, ArchiveReport};
pub use config::{BucketRoles, PipelineConfig};
pub use discovery::discover_studies;
pub use error::ArchiveError;
pub use listing::{DirectoryLister, ObjectListing};
pub use naming::{
    manifest_paths, StudyDescriptor, ARCHIVE_SUFFIX, DESCRIPTOR_FILENAME, MANIFEST_FILENAME,
};
pub use pipeline::{PassSummary, Pipeline, StudyOutcome, StudyState};
pub use progress::{tracing_sink, ProgressEvent, ProgressSink};
pub use verify::{
    ChecksumReport, ChecksumVerifier, Md5ManifestVerifier, ReadinessChecker, StudyConfig,
    VerificationResult, VerifiedStudy,
};
pub use zipper::{ObjectStoreZipper, ZipReport, ZipRequest, Zipper};
