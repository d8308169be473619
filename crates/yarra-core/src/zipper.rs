//! Packaging a study prefix into one zip object.

use std::io::{Cursor, Write};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use yarra_store::{ObjectStorage, WriteMode};

/// What to package and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipRequest {
    pub from_bucket: String,
    pub from_path: String,
    pub to_bucket: String,
    pub to_path: String,
}

/// Result of a successful zip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipReport {
    /// `{to_bucket}/{to_path}` of the archive.
    pub archive: String,
    /// Objects packed.
    pub files: usize,
    /// Archive size in bytes.
    pub bytes: u64,
    /// Hex MD5 of the archive.
    pub md5: String,
}

/// Copies every object under a prefix into a single archive object.
#[async_trait]
pub trait Zipper: Send + Sync {
    async fn zip_directory(&self, request: &ZipRequest) -> anyhow::Result<ZipReport>;
}

/// [`Zipper`] that downloads the objects and builds the archive in memory.
#[derive(Clone)]
pub struct ObjectStoreZipper {
    storage: Arc<dyn ObjectStorage>,
}

impl ObjectStoreZipper {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }
}

fn build_archive(entries: Vec<(String, Bytes)>) -> anyhow::Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("failed to add {}", name))?;
        writer.write_all(&content)?;
    }
    Ok(writer.finish()?.into_inner())
}

#[async_trait]
impl Zipper for ObjectStoreZipper {
    async fn zip_directory(&self, request: &ZipRequest) -> anyhow::Result<ZipReport> {
        let objects = self
            .storage
            .list(&request.from_bucket, Some(&request.from_path))
            .await?;
        anyhow::ensure!(
            !objects.is_empty(),
            "nothing to archive under {}/{}",
            request.from_bucket,
            request.from_path
        );

        let mut entries = Vec::with_capacity(objects.len());
        for object in &objects {
            let name = object
                .path
                .strip_prefix(request.from_path.as_str())
                .unwrap_or(&object.path)
                .to_string();
            let content = self.storage.download(&request.from_bucket, &object.path).await?;
            entries.push((name, content));
        }

        let files = entries.len();
        let archive = tokio::task::spawn_blocking(move || build_archive(entries)).await??;
        let report = ZipReport {
            archive: format!("{}/{}", request.to_bucket, request.to_path),
            files,
            bytes: archive.len() as u64,
            md5: format!("{:x}", md5::compute(&archive)),
        };

        self.storage
            .put(
                &request.to_bucket,
                &request.to_path,
                Bytes::from(archive),
                WriteMode::Overwrite,
            )
            .await?;

        debug!(archive = %report.archive, files, bytes = report.bytes, "archive written");
        Ok(report)
    }
}
