use crate::blob::{BlobError, BlobStore};
use crate::models::ImageUploadReport;
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unable to read `{reference}`: {reason}")]
    Read { reference: String, reason: String },
    #[error("upload of `{reference}` failed: {source}")]
    Upload {
        reference: String,
        #[source]
        source: BlobError,
    },
}

/// Where the bytes behind a non-URL image reference come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this reference has bytes to fetch and upload. Unaccepted
    /// references resolve to an empty URL.
    fn accepts(&self, reference: &ImageReference) -> bool;

    async fn read(&self, reference: &ImageReference) -> Result<Vec<u8>, ImageError>;
}

/// Reads local paths from disk, relative to `base_dir` unless absolute.
#[derive(Debug, Clone)]
pub struct LocalDiskSource {
    base_dir: PathBuf,
}

impl LocalDiskSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path_for(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl ImageSource for LocalDiskSource {
    fn name(&self) -> &'static str {
        "local_disk"
    }

    fn accepts(&self, reference: &ImageReference) -> bool {
        matches!(reference, ImageReference::LocalPath(_))
    }

    async fn read(&self, reference: &ImageReference) -> Result<Vec<u8>, ImageError> {
        let path = self.path_for(reference.as_str());
        tokio::fs::read(&path).await.map_err(|err| {
            debug!(target = "ingest.images", path = %path.display(), error = %err, "local_read_failed");
            ImageError::Read {
                reference: reference.as_str().to_string(),
                reason: err.to_string(),
            }
        })
    }
}

/// Serves files that arrived alongside the spreadsheet, matched by file name.
#[derive(Debug, Clone, Default)]
pub struct AttachedPartsSource {
    parts: HashMap<String, Vec<u8>>,
}

impl AttachedPartsSource {
    pub fn new(parts: HashMap<String, Vec<u8>>) -> Self {
        let parts = parts
            .into_iter()
            .map(|(name, bytes)| (part_key(&name), bytes))
            .collect();
        Self { parts }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    fn part(&self, reference: &ImageReference) -> Option<&Vec<u8>> {
        self.parts.get(&part_key(reference.file_name()))
    }
}

fn part_key(name: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    name.trim().to_lowercase()
}

#[async_trait]
impl ImageSource for AttachedPartsSource {
    fn name(&self) -> &'static str {
        "attached_parts"
    }

    fn accepts(&self, reference: &ImageReference) -> bool {
        match reference {
            ImageReference::LocalPath(_) => true,
            ImageReference::Opaque(value) => !value.is_empty() && self.part(reference).is_some(),
            ImageReference::RemoteUrl(_) => false,
        }
    }

    async fn read(&self, reference: &ImageReference) -> Result<Vec<u8>, ImageError> {
        self.part(reference)
            .cloned()
            .ok_or_else(|| ImageError::Read {
                reference: reference.as_str().to_string(),
                reason: format!("no attached file named `{}`", reference.file_name()),
            })
    }
}

pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub reference: ImageReference,
    /// Durable URL (empty for opaque values) or the failure reason.
    pub outcome: Result<String, String>,
}

impl ResolvedImage {
    pub fn url(&self) -> Option<&str> {
        self.outcome.as_deref().ok().filter(|url| !url.is_empty())
    }
}

/// Image columns of one row after resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowImages {
    pub main: Option<ResolvedImage>,
    pub gallery: Vec<ResolvedImage>,
}

impl RowImages {
    /// Empty when the main image is missing or did not resolve to a URL.
    pub fn main_url(&self) -> &str {
        self.main.as_ref().and_then(ResolvedImage::url).unwrap_or("")
    }

    /// Successfully resolved gallery URLs, in sheet order.
    pub fn gallery_urls(&self) -> Vec<String> {
        self.gallery
            .iter()
            .filter_map(ResolvedImage::url)
            .map(str::to_string)
            .collect()
    }
}

/// Turns image references into durable URLs, one upload at a time.
pub struct ImageResolver<'a> {
    source: &'a dyn ImageSource,
    blobs: &'a dyn BlobStore,
}

impl<'a> ImageResolver<'a> {
    pub fn new(source: &'a dyn ImageSource, blobs: &'a dyn BlobStore) -> Self {
        Self { source, blobs }
    }

    /// URLs pass through untouched, references the source accepts are read
    /// and uploaded, and anything else resolves to an empty string.
    pub async fn resolve(&self, reference: &ImageReference) -> Result<String, ImageError> {
        if let ImageReference::RemoteUrl(url) = reference {
            return Ok(url.clone());
        }
        if !self.source.accepts(reference) {
            return Ok(String::new());
        }
        let bytes = self.source.read(reference).await?;
        let file_name = reference.file_name();
        let content_type = content_type_for(file_name);
        let size = bytes.len();
        let url = self
            .blobs
            .upload(bytes, file_name, content_type)
            .await
            .map_err(|source| ImageError::Upload {
                reference: reference.as_str().to_string(),
                source,
            })?;
        debug!(
            target = "ingest.images",
            source = self.source.name(),
            reference = %reference.as_str(),
            size,
            content_type,
            "image_uploaded"
        );
        Ok(url)
    }

    async fn resolve_tallied(
        &self,
        reference: &ImageReference,
        tally: &mut ImageUploadReport,
    ) -> Result<String, ImageError> {
        let counted = !matches!(reference, ImageReference::RemoteUrl(_))
            && self.source.accepts(reference);
        let result = self.resolve(reference).await;
        if counted {
            tally.record(result.is_ok());
            crate::metrics::image_upload(result.is_ok());
        }
        result
    }

    /// Main image first, then each gallery entry. A main-image failure aborts
    /// the row; a gallery failure only drops that image.
    pub async fn resolve_row(
        &self,
        main: Option<&str>,
        gallery: Option<&str>,
        tally: &mut ImageUploadReport,
    ) -> Result<RowImages, ImageError> {
        let mut images = RowImages::default();

        if let Some(value) = main {
            let reference = ImageReference::classify(value);
            let url = self.resolve_tallied(&reference, tally).await?;
            images.main = Some(ResolvedImage {
                reference,
                outcome: Ok(url),
            });
        }

        for reference in gallery.map(ImageReference::classify_list).unwrap_or_default() {
            let outcome = match self.resolve_tallied(&reference, tally).await {
                Ok(url) => Ok(url),
                Err(err) => {
                    warn!(
                        target = "ingest.images",
                        reference = %reference.as_str(),
                        error = %err,
                        "gallery_image_dropped"
                    );
                    Err(err.to_string())
                }
            };
            images.gallery.push(ResolvedImage { reference, outcome });
        }

        Ok(images)
    }
}
