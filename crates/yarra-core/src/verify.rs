//! Readiness and checksum verification.
//!
//! A study is [`VerificationResult::Verified`] only when every manifest
//! derived from its descriptor exists and every manifest's checksum check
//! passes. Missing manifests short-circuit before any checksum work.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};
use yarra_store::{ObjectStorage, StoreResult};

use crate::error::ArchiveError;
use crate::listing::ObjectListing;
use crate::naming::StudyDescriptor;
use crate::progress::{emit, ProgressEvent, ProgressSink};

/// Parsed descriptor content.
#[derive(Debug, Clone, Deserialize)]
pub struct StudyConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// One entry per configuration; only the count matters here.
    pub configurations: Vec<serde_json::Value>,
}

impl StudyConfig {
    pub fn from_slice(path: &str, bytes: &[u8]) -> Result<Self, ArchiveError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ArchiveError::Descriptor {
            path: path.to_string(),
            reason: format!("not UTF-8: {}", e),
        })?;
        serde_json::from_str(text).map_err(|e| ArchiveError::Descriptor {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn configuration_count(&self) -> usize {
        self.configurations.len()
    }
}

/// Outcome of checking one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    pub manifest: String,
    pub passed: bool,
    /// Files whose digest matched.
    pub good: Vec<String>,
    /// Files whose digest did not match.
    pub bad: Vec<String>,
    /// Files listed in the manifest but absent from storage.
    pub missing: Vec<String>,
    /// Diagnostic when the manifest itself is unusable.
    pub detail: Option<String>,
}

impl ChecksumReport {
    fn summary(&self) -> String {
        if let Some(detail) = &self.detail {
            return format!("{} ({})", self.manifest, detail);
        }
        format!(
            "{} (bad: {}, missing: {})",
            self.manifest,
            self.bad.len(),
            self.missing.len()
        )
    }
}

/// Validates one checksum manifest.
#[async_trait]
pub trait ChecksumVerifier: Send + Sync {
    async fn verify(&self, bucket: &str, manifest: &str) -> StoreResult<ChecksumReport>;
}

/// [`ChecksumVerifier`] for `md5.json` manifests.
///
/// A manifest maps file names, relative to its own directory, to hex MD5
/// digests:
///
/// ```json
/// { "trades.csv": "9e107d9d372bb6826bd81d3542a419d6", "ohlc.csv": "..." }
/// ```
#[derive(Clone)]
pub struct Md5ManifestVerifier {
    storage: Arc<dyn ObjectStorage>,
}

impl Md5ManifestVerifier {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ChecksumVerifier for Md5ManifestVerifier {
    async fn verify(&self, bucket: &str, manifest: &str) -> StoreResult<ChecksumReport> {
        let mut report = ChecksumReport {
            manifest: manifest.to_string(),
            passed: false,
            good: Vec::new(),
            bad: Vec::new(),
            missing: Vec::new(),
            detail: None,
        };

        let bytes = self.storage.download(bucket, manifest).await?;
        let expected: BTreeMap<String, String> = match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                report.detail = Some(format!("unreadable manifest: {}", e));
                return Ok(report);
            }
        };

        let dir = manifest.rsplit_once('/').map_or("", |(dir, _)| dir);
        for (name, digest) in expected {
            let path = if dir.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", dir, name)
            };
            match self.storage.download(bucket, &path).await {
                Ok(content) => {
                    let actual = format!("{:x}", md5::compute(&content));
                    if actual.eq_ignore_ascii_case(digest.trim()) {
                        report.good.push(name);
                    } else {
                        debug!(bucket, path = %path, expected = %digest, actual = %actual, "md5 mismatch");
                        report.bad.push(name);
                    }
                }
                Err(e) if e.is_not_found() => report.missing.push(name),
                Err(e) => return Err(e),
            }
        }

        report.passed = report.bad.is_empty() && report.missing.is_empty();
        Ok(report)
    }
}

/// A study that passed verification. Only [`ReadinessChecker`] creates these,
/// so archival cannot be reached without a `Verified` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedStudy(StudyDescriptor);

impl VerifiedStudy {
    pub(crate) fn new(study: StudyDescriptor) -> Self {
        Self(study)
    }

    pub fn descriptor(&self) -> &StudyDescriptor {
        &self.0
    }
}

/// Tri-state verdict for one study.
#[derive(Debug)]
pub enum VerificationResult {
    /// Some manifests are not written yet.
    NotReady { missing: Vec<String> },
    /// Descriptor problem, checksum mismatch or storage failure.
    Failed(ArchiveError),
    Verified(VerifiedStudy),
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotReady { .. } => "not_ready",
            Self::Failed(_) => "failed",
            Self::Verified(_) => "verified",
        }
    }

    /// `Ok` only for a verified study.
    pub fn into_result(self, study: &StudyDescriptor) -> Result<VerifiedStudy, ArchiveError> {
        match self {
            Self::Verified(verified) => Ok(verified),
            Self::NotReady { missing } => Err(ArchiveError::NotReady {
                study: study.to_string(),
                missing,
            }),
            Self::Failed(e) => Err(e),
        }
    }
}

/// Decides whether a discovered study may be archived.
#[derive(Clone)]
pub struct ReadinessChecker {
    storage: Arc<dyn ObjectStorage>,
    verifier: Arc<dyn ChecksumVerifier>,
    bucket: String,
    progress: Option<ProgressSink>,
}

impl ReadinessChecker {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        verifier: Arc<dyn ChecksumVerifier>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            verifier,
            bucket: bucket.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Fetch and parse the descriptor.
    pub async fn load_config(&self, study: &StudyDescriptor) -> Result<StudyConfig, ArchiveError> {
        let bytes = self
            .storage
            .download(&self.bucket, study.as_str())
            .await
            .map_err(|e| ArchiveError::Descriptor {
                path: study.to_string(),
                reason: e.to_string(),
            })?;
        StudyConfig::from_slice(study.as_str(), &bytes)
    }

    /// Classify one study against the current listing. Never fails: every
    /// error becomes [`VerificationResult::Failed`].
    pub async fn check(&self, study: &StudyDescriptor, listing: &ObjectListing) -> VerificationResult {
        emit(self.progress.as_ref(), || ProgressEvent::Verifying {
            study: study.to_string(),
        });

        let config = match self.load_config(study).await {
            Ok(config) => config,
            Err(e) => {
                warn!(study = %study, error = %e, "descriptor unusable");
                return VerificationResult::Failed(e);
            }
        };

        let manifests = study.manifest_paths(config.configuration_count());
        let missing: Vec<String> = listing
            .missing(&manifests)
            .into_iter()
            .map(String::from)
            .collect();
        if !missing.is_empty() {
            info!(study = %study, missing = missing.len(), "study not ready");
            return VerificationResult::NotReady { missing };
        }

        // All checks run to completion even after one fails.
        let reports = join_all(
            manifests
                .iter()
                .map(|manifest| self.verifier.verify(&self.bucket, manifest)),
        )
        .await;

        let mut failed = Vec::new();
        for (manifest, report) in manifests.iter().zip(reports) {
            let passed = match report {
                Ok(report) if report.passed => true,
                Ok(report) => {
                    failed.push(report.summary());
                    false
                }
                Err(e) => {
                    failed.push(format!("{} ({})", manifest, e));
                    false
                }
            };
            emit(self.progress.as_ref(), || ProgressEvent::ManifestChecked {
                study: study.to_string(),
                manifest: manifest.clone(),
                passed,
            });
        }

        if failed.is_empty() {
            debug!(study = %study, manifests = manifests.len(), "study verified");
            VerificationResult::Verified(VerifiedStudy::new(study.clone()))
        } else {
            warn!(study = %study, failed = ?failed, "checksum verification failed");
            VerificationResult::Failed(ArchiveError::VerificationFailed {
                study: study.to_string(),
                failed,
            })
        }
    }
}
