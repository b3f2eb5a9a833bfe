use crate::blob::BlobStore;
use crate::catalog::{CatalogError, CatalogStore};
use crate::config::IngestConfig;
use crate::images::{ImageResolver, ImageSource};
use crate::models::{BatchReport, ImageUploadReport};
use crate::normalize::{Normalizer, ProductDraft, ProductRow, StyleCodeStrategy};
use crate::tabular::{self, DecodeError, RawRow};
use std::{future::Future, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Why a single row was skipped. The `Display` text is what lands in the
/// batch report.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("{field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("Category not found: {0}")]
    CategoryNotFound(String),
    #[error("Subcategory `{slug}` not found in category `{category}`")]
    SubcategoryNotFound { slug: String, category: String },
    #[error("Image upload failed: {0}")]
    ImageUploadFailed(String),
    #[error("Persistence failed: {0}")]
    UpstreamPersistence(String),
}

impl RowError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        RowError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RowError::Validation { .. } => "validation",
            RowError::CategoryNotFound(_) => "category_not_found",
            RowError::SubcategoryNotFound { .. } => "subcategory_not_found",
            RowError::ImageUploadFailed(_) => "image_upload_failed",
            RowError::UpstreamPersistence(_) => "upstream_persistence",
        }
    }
}

impl From<CatalogError> for RowError {
    fn from(err: CatalogError) -> Self {
        RowError::UpstreamPersistence(err.to_string())
    }
}

/// Failures that reject the whole upload before any row is processed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("unsupported file format `{0}`; expected csv, xlsx or xls")]
    UnsupportedFormat(String),
    #[error("file could not be decoded: {0}")]
    Malformed(String),
    #[error("file has {rows} rows; at most {max} are accepted per upload")]
    TooManyRows { rows: usize, max: usize },
}

impl From<DecodeError> for BatchError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnsupportedFormat(ext) => BatchError::UnsupportedFormat(ext),
            DecodeError::Malformed(reason) => BatchError::Malformed(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_batch_rows: usize,
    pub style_codes: StyleCodeStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for PipelineConfig {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_batch_rows: config.max_batch_rows,
            style_codes: config.style_codes,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<PipelineConfig>,
    catalog: Arc<dyn CatalogStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        catalog: Arc<dyn CatalogStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog,
            blobs,
        }
    }

    /// Decodes an uploaded file and processes every row. Only decoding and
    /// the row ceiling can fail the batch as a whole.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        extension: &str,
        source: &dyn ImageSource,
    ) -> Result<BatchReport, BatchError> {
        let rows = self
            .capture_stage("decode", async { tabular::decode(bytes, extension) })
            .await?;
        if rows.len() > self.config.max_batch_rows {
            return Err(BatchError::TooManyRows {
                rows: rows.len(),
                max: self.config.max_batch_rows,
            });
        }
        Ok(self.run(rows, source).await)
    }

    /// Rows are handled one at a time in file order. A failing row is
    /// recorded and skipped; it never stops the batch.
    pub async fn run(&self, rows: Vec<RawRow>, source: &dyn ImageSource) -> BatchReport {
        let started = Instant::now();
        let resolver = ImageResolver::new(source, self.blobs.as_ref());
        let normalizer = Normalizer::new(self.catalog.as_ref(), self.config.style_codes);
        let mut report = BatchReport {
            total: rows.len(),
            ..BatchReport::default()
        };

        self.capture_stage("process_rows", async {
            for (index, raw) in rows.iter().enumerate() {
                let row = ProductRow::from_raw(raw);
                match self
                    .process_row(&row, index, &resolver, &normalizer, &mut report.image_uploads)
                    .await
                {
                    Ok(created) => {
                        crate::metrics::row_outcome("success");
                        report.record_success(created);
                    }
                    Err(err) => {
                        crate::metrics::row_outcome(err.kind());
                        warn!(
                            target = "ingest.pipeline",
                            row = index + 1,
                            name = %row.label(),
                            kind = err.kind(),
                            error = %err,
                            "row_failed"
                        );
                        report.record_failure(index + 1, row.label(), err.to_string());
                    }
                }
            }
        })
        .await;

        report.elapsed_ms = started.elapsed().as_millis();
        info!(
            target = "ingest.pipeline",
            source = source.name(),
            total = report.total,
            success = report.success,
            failed = report.failed,
            created = report.created,
            updated = report.updated,
            images_total = report.image_uploads.total,
            images_failed = report.image_uploads.failed,
            elapsed_ms = report.elapsed_ms as u64,
            "batch_completed"
        );
        report
    }

    async fn process_row(
        &self,
        row: &ProductRow,
        index: usize,
        resolver: &ImageResolver<'_>,
        normalizer: &Normalizer<'_>,
        tally: &mut ImageUploadReport,
    ) -> Result<bool, RowError> {
        let images = resolver
            .resolve_row(
                row.main_image.as_deref(),
                row.gallery_images.as_deref(),
                tally,
            )
            .await
            .map_err(|err| RowError::ImageUploadFailed(err.to_string()))?;
        let draft = normalizer.normalize(row, &images, index).await?;
        self.upsert(&draft).await
    }

    /// Returns `true` when the SKU was new and a product was inserted.
    async fn upsert(&self, draft: &ProductDraft) -> Result<bool, RowError> {
        match self.catalog.find_product_by_sku(&draft.sku).await? {
            Some(existing) => {
                self.catalog.update_product(&existing.id, draft).await?;
                Ok(false)
            }
            None => {
                self.catalog.insert_product(draft).await?;
                Ok(true)
            }
        }
    }

    async fn capture_stage<T, Fut>(&self, name: &'static str, fut: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        let outcome = fut.await;
        crate::metrics::stage_elapsed(name, started.elapsed().as_millis());
        outcome
    }
}
