//! Directory listings: object path → metadata, rebuilt every pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use yarra_store::{validate_bucket, ObjectMeta, ObjectStorage};

use crate::error::ArchiveError;

/// Immutable snapshot of a bucket (or part of one), keyed by object path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    entries: BTreeMap<String, ObjectMeta>,
}

impl ObjectListing {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&ObjectMeta> {
        self.entries.get(path)
    }

    /// Paths in listing order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Paths from `paths` that are not in the listing, in input order.
    pub fn missing<'a>(&self, paths: &'a [String]) -> Vec<&'a str> {
        paths
            .iter()
            .map(String::as_str)
            .filter(|p| !self.contains(p))
            .collect()
    }
}

impl FromIterator<ObjectMeta> for ObjectListing {
    fn from_iter<I: IntoIterator<Item = ObjectMeta>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|m| (m.path.clone(), m)).collect(),
        }
    }
}

/// Enumerates a bucket into an [`ObjectListing`].
#[derive(Clone)]
pub struct DirectoryLister {
    storage: Arc<dyn ObjectStorage>,
}

impl DirectoryLister {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    /// List `bucket`, optionally restricted to paths starting with `prefix`.
    ///
    /// An invalid bucket name fails before any storage call.
    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<ObjectListing, ArchiveError> {
        validate_bucket(bucket).map_err(|e| ArchiveError::validation(e.to_string()))?;

        let listing: ObjectListing = self.storage.list(bucket, prefix).await?.into_iter().collect();
        debug!(bucket, prefix = prefix.unwrap_or(""), objects = listing.len(), "listing built");
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use yarra_store::{ObjectStoreBackend, WriteMode};

    #[tokio::test]
    async fn lists_with_and_without_prefix() {
        let backend = ObjectStoreBackend::memory(["sim"]);
        for path in ["a/config.json", "a/0/md5.json", "b/config.json"] {
            backend
                .put("sim", path, Bytes::from_static(b"{}"), WriteMode::Create)
                .await
                .unwrap();
        }
        let lister = DirectoryLister::new(Arc::new(backend));

        let all = lister.list("sim", None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains("a/0/md5.json"));
        assert_eq!(all.get("b/config.json").map(|m| m.size), Some(2));

        let a = lister.list("sim", Some("a/")).await.unwrap();
        assert_eq!(a.paths().collect::<Vec<_>>(), vec!["a/0/md5.json", "a/config.json"]);
    }

    #[tokio::test]
    async fn empty_bucket_name_is_a_validation_error() {
        let lister = DirectoryLister::new(Arc::new(ObjectStoreBackend::memory(["sim"])));
        let err = lister.list("", None).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Validation { .. }));
    }

    #[test]
    fn missing_reports_absent_paths_in_order() {
        let listing: ObjectListing = ["s/0/md5.json"]
            .into_iter()
            .map(|p| ObjectMeta {
                path: p.to_string(),
                size: 0,
                last_modified: None,
                e_tag: None,
                version: None,
            })
            .collect();
        let wanted = vec![
            "s/0/md5.json".to_string(),
            "s/1/md5.json".to_string(),
            "s/2/md5.json".to_string(),
        ];
        assert_eq!(listing.missing(&wanted), vec!["s/1/md5.json", "s/2/md5.json"]);
    }
}
