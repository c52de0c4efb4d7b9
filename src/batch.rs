//! Batch orchestration: documents in, per-document JSON files and one archive out.
//!
//! For each document, in input order:
//!
//! ```text
//! save input ─▶ rasterise ─▶ extract pages ─▶ merge ─▶ transform ─▶ write raw + structured
//! ```
//!
//! then every structured file is zipped. The target schema is loaded once per
//! batch; it is the only state shared between documents.
//!
//! Failure policy:
//! - a page that cannot be extracted degrades to an error marker;
//! - a failed transformation degrades to an error-marker structured file;
//! - a document that cannot be rasterised is recorded as failed and the batch
//!   moves on (unless `fail_fast` is set);
//! - schema, provider, pdfium-binding and write failures abort the batch.

use crate::capability::{resolve_capabilities, JsonCapability};
use crate::config::{OutputLayout, PipelineConfig};
use crate::error::InvoiceError;
use crate::output::{
    BatchResult, BatchStats, Document, DocumentFailure, DocumentOutcome, DocumentReport,
    DocumentRun, ExtractionResult, MergedRecord, StructuredRecord,
};
use crate::pipeline::extract::PageExtractor;
use crate::pipeline::input::list_json_files;
use crate::pipeline::merge::merge_pages;
use crate::pipeline::persist;
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::pipeline::transform::SchemaTransformer;
use crate::schema::TargetSchema;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// The configured extraction pipeline.
///
/// Cheap to share behind an `Arc`; it holds no per-batch state.
pub struct InvoicePipeline {
    config: PipelineConfig,
    rasterizer: Arc<dyn PageRasterizer>,
    extractor: PageExtractor,
    transformer: SchemaTransformer,
}

impl InvoicePipeline {
    /// Assemble a pipeline from explicit parts.
    pub fn new(
        config: PipelineConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        extraction: Arc<dyn JsonCapability>,
        transform: Arc<dyn JsonCapability>,
    ) -> Self {
        let extractor = PageExtractor::new(extraction, &config);
        let transformer = SchemaTransformer::new(transform, &config);
        Self {
            config,
            rasterizer,
            extractor,
            transformer,
        }
    }

    /// Pdfium rasteriser plus the LLM providers resolved from `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, InvoiceError> {
        let (extraction, transform) = resolve_capabilities(&config)?;
        let rasterizer = Arc::new(PdfiumRasterizer::new(&config));
        info!(
            "Pipeline ready: extraction via {}, transform via {}",
            extraction.name(),
            transform.name()
        );
        Ok(Self::new(config, rasterizer, extraction, transform))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.config.layout
    }

    /// Rasterise, extract, merge and transform one document without
    /// touching the filesystem.
    pub async fn run_document(
        &self,
        document: &Document,
        schema: &TargetSchema,
    ) -> Result<DocumentRun, InvoiceError> {
        let start = Instant::now();
        let filename = document.filename.as_str();

        let images = self.rasterizer.rasterize(document).await?;
        info!("{}: {} pages rasterised", filename, images.len());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_start(filename, images.len());
        }

        let pages = self.extractor.extract_all(filename, &images).await;
        drop(images);

        let merged = merge_pages(&pages, self.config.merge_strategy);
        let structured = self.transformer.transform(&merged, schema).await;

        Ok(DocumentRun {
            filename: document.filename.clone(),
            pages,
            merged,
            structured,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run one document and write its raw and structured files.
    pub async fn process_document(
        &self,
        document: &Document,
        schema: &TargetSchema,
    ) -> Result<DocumentReport, InvoiceError> {
        let layout = &self.config.layout;
        persist::save_input(layout, document).await?;

        let run = self.run_document(document, schema).await?;

        let stem = persist::output_stem(&run.filename);
        let raw_path = persist::raw_path(layout, &stem);
        let structured_path = persist::structured_path(layout, &stem);
        persist::write_json(&raw_path, &Value::Object(run.merged.clone())).await?;
        persist::write_json(&structured_path, &run.structured.to_json()).await?;

        let failed_pages = run.failed_pages();
        let transform_error = match &run.structured {
            StructuredRecord::Error(msg) => Some(msg.clone()),
            StructuredRecord::Structured(_) => None,
        };

        info!(
            "{}: {}/{} pages extracted, structured output {} ({}ms)",
            run.filename,
            run.pages.len() - failed_pages,
            run.pages.len(),
            if transform_error.is_some() { "degraded" } else { "ok" },
            run.duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_document_complete(&run.filename, transform_error.is_none());
        }

        Ok(DocumentReport {
            filename: run.filename,
            page_count: run.pages.len(),
            failed_pages,
            raw_path,
            structured_path,
            transform_error,
            duration_ms: run.duration_ms,
        })
    }

    /// Process every document and package the structured files.
    ///
    /// Returns `Err` only for batch-fatal errors. A batch with zero
    /// documents still produces an (empty) archive.
    pub async fn process_batch(&self, documents: Vec<Document>) -> Result<BatchResult, InvoiceError> {
        let start = Instant::now();
        let layout = &self.config.layout;
        info!("Starting batch of {} documents", documents.len());

        layout.ensure_dirs()?;
        let schema = TargetSchema::load(&layout.schema_path).await?;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(documents.len());
        }

        let mut stats = BatchStats {
            total_documents: documents.len(),
            ..Default::default()
        };
        let mut outcomes = Vec::with_capacity(documents.len());
        let mut structured_files = Vec::with_capacity(documents.len());

        for document in &documents {
            match self.process_document(document, &schema).await {
                Ok(report) => {
                    stats.completed_documents += 1;
                    stats.total_pages += report.page_count;
                    stats.failed_pages += report.failed_pages;
                    if report.transform_error.is_some() {
                        stats.transform_failures += 1;
                    }
                    structured_files.push(report.structured_path.clone());
                    outcomes.push(DocumentOutcome::Completed(report));
                }
                Err(e) if e.is_document_level() && !self.config.fail_fast => {
                    error!("{}: document failed: {}", document.filename, e);
                    stats.failed_documents += 1;
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_document_failed(&document.filename, e.to_string());
                    }
                    outcomes.push(DocumentOutcome::Failed(DocumentFailure {
                        filename: document.filename.clone(),
                        error: e.to_string(),
                    }));
                }
                Err(e) => {
                    error!("{}: aborting batch: {}", document.filename, e);
                    return Err(e);
                }
            }
        }

        let archive_path = persist::write_archive(structured_files, layout.archive_path()).await?;
        stats.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch complete: {}/{} documents, {} failed pages, {} transform failures, {}ms",
            stats.completed_documents,
            stats.total_documents,
            stats.failed_pages,
            stats.transform_failures,
            stats.total_duration_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(stats.completed_documents, stats.failed_documents);
        }

        Ok(BatchResult {
            documents: outcomes,
            archive_path,
            stats,
        })
    }

    /// Re-run the schema transformation over every `*.json` file in the raw
    /// directory.
    ///
    /// A file holding an array of page objects is merged first; a file
    /// holding an object is taken as an already merged record. Files that
    /// cannot be read or parsed are reported as failed and skipped.
    pub async fn restructure_raw_dir(&self) -> Result<Vec<DocumentOutcome>, InvoiceError> {
        let layout = &self.config.layout;
        layout.ensure_dirs()?;
        let schema = TargetSchema::load(&layout.schema_path).await?;
        let files = list_json_files(&layout.raw_dir).await?;
        info!(
            "Re-structuring {} raw files from {}",
            files.len(),
            layout.raw_dir.display()
        );

        let mut outcomes = Vec::with_capacity(files.len());
        for path in files {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let (merged, page_count, failed_pages) = match read_raw_record(&path, &self.config).await {
                Ok(read) => read,
                Err(detail) => {
                    warn!("{}: skipped: {}", filename, detail);
                    outcomes.push(DocumentOutcome::Failed(DocumentFailure {
                        filename,
                        error: detail,
                    }));
                    continue;
                }
            };

            let start = Instant::now();
            let structured = self.transformer.transform(&merged, &schema).await;
            let structured_path =
                persist::structured_path(layout, &persist::raw_file_stem(&filename));
            persist::write_json(&structured_path, &structured.to_json()).await?;

            let transform_error = match structured {
                StructuredRecord::Error(msg) => Some(msg),
                StructuredRecord::Structured(_) => None,
            };
            info!("{} → {}", filename, structured_path.display());
            outcomes.push(DocumentOutcome::Completed(DocumentReport {
                filename,
                page_count,
                failed_pages,
                raw_path: path,
                structured_path,
                transform_error,
                duration_ms: start.elapsed().as_millis() as u64,
            }));
        }
        Ok(outcomes)
    }
}

/// Read one raw file as `(merged record, page count, failed pages)`.
async fn read_raw_record(
    path: &Path,
    config: &PipelineConfig,
) -> Result<(MergedRecord, usize, usize), String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| e.to_string())?;
    let value: Value = serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))?;

    match value {
        Value::Array(items) => {
            let pages: Vec<ExtractionResult> =
                items.into_iter().map(ExtractionResult::from_json).collect();
            let failed = pages.iter().filter(|p| p.is_error()).count();
            Ok((merge_pages(&pages, config.merge_strategy), pages.len(), failed))
        }
        Value::Object(record) => Ok((record, 1, 0)),
        other => Err(format!(
            "expected a JSON object or array, got {}",
            crate::pipeline::response::json_kind(&other)
        )),
    }
}
