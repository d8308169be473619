//! Deterministic naming rules for studies.
//!
//! # Layout
//!
//! ```text
//! {study}/config.json          # descriptor
//! {study}/{i}/md5.json         # checksum manifest for configuration i
//! {study}.zip                  # archive, in the study bucket
//! {study}/config.json          # lease marker, in the lock bucket
//! ```

use std::fmt;

/// Canonical descriptor file name.
pub const DESCRIPTOR_FILENAME: &str = "config.json";

/// Checksum manifest written next to each configuration's outputs.
pub const MANIFEST_FILENAME: &str = "md5.json";

/// Suffix replacing `/config.json` in the archive name.
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// True when the last path segment is exactly the descriptor file name.
pub fn is_descriptor_path(path: &str) -> bool {
    path == DESCRIPTOR_FILENAME
        || path
            .strip_suffix(DESCRIPTOR_FILENAME)
            .is_some_and(|dir| dir.ends_with('/'))
}

/// Path of a study's descriptor file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudyDescriptor(String);

impl StudyDescriptor {
    /// `None` unless `path` names a descriptor file.
    pub fn new(path: impl Into<String>) -> Option<Self> {
        let path = path.into();
        is_descriptor_path(&path).then_some(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything under the study: the descriptor path minus its file name.
    /// Empty or `/` for a descriptor at the bucket root.
    pub fn source_prefix(&self) -> &str {
        self.0
            .strip_suffix(DESCRIPTOR_FILENAME)
            .unwrap_or_default()
    }

    /// Whether deleting [`Self::source_prefix`] would touch the whole bucket.
    pub fn is_root(&self) -> bool {
        matches!(self.source_prefix(), "" | "/")
    }

    /// Manifest paths for `count` configurations, in index order.
    pub fn manifest_paths(&self, count: usize) -> Vec<String> {
        manifest_paths(self.as_str(), count)
    }

    /// Archive object name: `a/b/config.json` becomes `a/b.zip`.
    /// `None` for a root descriptor.
    pub fn archive_path(&self) -> Option<String> {
        if self.is_root() {
            return None;
        }
        self.0
            .strip_suffix(DESCRIPTOR_FILENAME)
            .and_then(|dir| dir.strip_suffix('/'))
            .map(|study| format!("{}{}", study, ARCHIVE_SUFFIX))
    }

    /// Key of the study's lease marker.
    pub fn lock_key(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for StudyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StudyDescriptor {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Manifest paths derived from a descriptor path and a configuration count.
pub fn manifest_paths(descriptor: &str, count: usize) -> Vec<String> {
    let dir = descriptor
        .strip_suffix(DESCRIPTOR_FILENAME)
        .unwrap_or(descriptor);
    (0..count)
        .map(|i| format!("{}{}/{}", dir, i, MANIFEST_FILENAME))
        .collect()
}
