//! Configuration types for invoice extraction.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The output directories live in an explicit
//! [`OutputLayout`] handed to the orchestrator, not in process-wide constants,
//! so tests and embedders can point a pipeline at any directory tree.

use crate::error::InvoiceError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Name of the archive written next to the structured outputs.
pub const DEFAULT_ARCHIVE_NAME: &str = "structured_invoices.zip";

/// Configuration for an invoice extraction pipeline.
///
/// # Example
/// ```rust
/// use invoice2json::{MergeStrategy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .model("gpt-4.1-mini")
///     .merge_strategy(MergeStrategy::Deep)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 200.
    ///
    /// 200 DPI keeps small print on invoices (tax ids, per-night rates)
    /// legible to the model while a letter-size page stays around 1700 × 2200 px.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4000.
    ///
    /// Only bites on oversized pages; ordinary invoices render below it at 200 DPI.
    pub max_rendered_pixels: u32,

    /// Model used for page extraction, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// Model used for schema transformation. Falls back to `model`.
    pub transform_model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`
    /// and is used for both extraction and transformation.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Custom extraction system prompt. If None, uses the built-in one.
    pub extraction_prompt: Option<String>,

    /// Language every structured value is translated to. Default: "English".
    pub target_language: String,

    /// How per-page results are combined. Default: [`MergeStrategy::LastWriteWins`].
    pub merge_strategy: MergeStrategy,

    /// Page extractions of one document allowed in flight at once. Default: 1.
    ///
    /// Results are always merged in page order regardless of this value.
    pub page_concurrency: usize,

    /// Abort the batch on the first document that cannot be rasterised. Default: false.
    pub fail_fast: bool,

    /// Directory containing the pdfium shared library. If None, binds to the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Maximum accepted HTTP upload body in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,

    /// Where inputs, raw and structured outputs and the schema live.
    pub layout: OutputLayout,

    /// Per-document / per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 4000,
            model: None,
            transform_model: None,
            provider_name: None,
            provider: None,
            max_tokens: 4096,
            extraction_prompt: None,
            target_language: "English".to_string(),
            merge_strategy: MergeStrategy::default(),
            page_concurrency: 1,
            fail_fast: false,
            pdfium_lib_path: None,
            download_timeout_secs: 120,
            max_upload_bytes: 50 * 1024 * 1024,
            layout: OutputLayout::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("transform_model", &self.transform_model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens", &self.max_tokens)
            .field("target_language", &self.target_language)
            .field("merge_strategy", &self.merge_strategy)
            .field("page_concurrency", &self.page_concurrency)
            .field("fail_fast", &self.fail_fast)
            .field("layout", &self.layout)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Model for the transformation call.
    pub fn effective_transform_model(&self) -> Option<&str> {
        self.transform_model.as_deref().or(self.model.as_deref())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn transform_model(mut self, model: impl Into<String>) -> Self {
        self.config.transform_model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn target_language(mut self, language: impl Into<String>) -> Self {
        self.config.target_language = language.into();
        self
    }

    pub fn merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.config.merge_strategy = strategy;
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn fail_fast(mut self, v: bool) -> Self {
        self.config.fail_fast = v;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn layout(mut self, layout: OutputLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, InvoiceError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(InvoiceError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.page_concurrency == 0 {
            return Err(InvoiceError::InvalidConfig(
                "Page concurrency must be ≥ 1".into(),
            ));
        }
        if c.target_language.trim().is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "Target language must not be empty".into(),
            ));
        }
        if c.provider.is_some() && c.transform_model.is_some() {
            return Err(InvoiceError::InvalidConfig(
                "transform_model needs a provider resolved by name or environment; \
                 an injected provider serves both calls"
                    .into(),
            ));
        }
        if c.layout.archive_name.contains(['/', '\\']) {
            return Err(InvoiceError::InvalidConfig(format!(
                "Archive name must be a bare file name, got '{}'",
                c.layout.archive_name
            )));
        }
        Ok(self.config)
    }
}

// ── Output layout ────────────────────────────────────────────────────────

/// Directories and files the pipeline reads from and writes to.
///
/// The directories accumulate artifacts across runs; nothing is cleaned up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLayout {
    /// Uploaded PDFs are saved here before processing.
    pub inputs_dir: PathBuf,
    /// Merged raw extraction per document (`<stem>_raw.json`).
    pub raw_dir: PathBuf,
    /// Structured output per document (`<stem>_structured.json`) and the archive.
    pub structured_dir: PathBuf,
    /// Target schema JSON file.
    pub schema_path: PathBuf,
    /// File name of the batch archive inside `structured_dir`.
    pub archive_name: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::under(".")
    }
}

impl OutputLayout {
    /// Standard layout rooted at `root`: `inputs/`, `outputs/`,
    /// `structured_outputs/` and `invoice_target_schema.json`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            inputs_dir: root.join("inputs"),
            raw_dir: root.join("outputs"),
            structured_dir: root.join("structured_outputs"),
            schema_path: root.join("invoice_target_schema.json"),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
        }
    }

    /// Full path of the batch archive.
    pub fn archive_path(&self) -> PathBuf {
        self.structured_dir.join(&self.archive_name)
    }

    /// Create the three directories if absent.
    pub fn ensure_dirs(&self) -> Result<(), InvoiceError> {
        for dir in [&self.inputs_dir, &self.raw_dir, &self.structured_dir] {
            std::fs::create_dir_all(dir).map_err(|e| InvoiceError::OutputWriteFailed {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the per-page extraction results of one document are combined.
///
/// Invoices that continue a section onto the next page ("Charges" on pages
/// 1 and 2) lose the first page's part under [`MergeStrategy::LastWriteWins`].
/// [`MergeStrategy::Deep`] keeps both, at the cost of possibly duplicating
/// rows the model repeated on every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Top-level keys from later pages replace earlier ones. (default)
    #[default]
    LastWriteWins,
    /// Nested objects are merged recursively, arrays are concatenated,
    /// later scalars replace earlier ones.
    Deep,
}
