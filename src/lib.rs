//! # invoice2json
//!
//! Turn scanned or digital PDF invoices into JSON records shaped to a fixed
//! target schema, using a vision-capable LLM.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render     rasterise every page via pdfium (spawn_blocking), 200 DPI
//!  ├─ 2. Extract    one vision call per page → section mapping or error marker
//!  ├─ 3. Merge      fold page mappings into one record (last write wins)
//!  ├─ 4. Transform  reshape the record to the target schema
//!  └─ 5. Persist    <stem>_raw.json, <stem>_structured.json, batch zip
//! ```
//!
//! A page that cannot be read degrades to `{"error": "<provider> Error: ..."}`
//! and contributes nothing to the merge; a failed transformation degrades to
//! `{"error": "Transform Error: ..."}`. Only batch-level problems (missing
//! schema, unconfigured provider, unwritable outputs) surface as `Err`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice2json::{Document, InvoicePipeline, OutputLayout, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder()
//!         .layout(OutputLayout::under("."))
//!         .build()?;
//!     let pipeline = InvoicePipeline::from_config(config)?;
//!
//!     let pdf = std::fs::read("hotel_may.pdf")?;
//!     let result = pipeline
//!         .process_batch(vec![Document::new("hotel_may.pdf", pdf)])
//!         .await?;
//!     println!("archive: {}", result.archive_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `invoice2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | The axum HTTP front end in [`server`] |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod capability;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::InvoicePipeline;
pub use capability::{JsonCapability, JsonRequest, LlmCapability};
pub use config::{MergeStrategy, OutputLayout, PipelineConfig, PipelineConfigBuilder};
pub use error::{CapabilityError, InvoiceError};
pub use output::{
    BatchResult, BatchStats, Document, DocumentFailure, DocumentOutcome, DocumentReport,
    DocumentRun, ExtractionResult, MergedRecord, PageImage, StructuredRecord,
};
pub use pipeline::input::{resolve_input, resolve_inputs};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::TargetSchema;
