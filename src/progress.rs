//! Progress-callback trait for per-document and per-page batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator walks a batch. The CLI renders them as a
//! progress bar; a service could forward them to a channel or a log.
//!
//! # Example
//!
//! ```rust
//! use invoice2json::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     pages: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for PageCounter {
//!     fn on_page_complete(&self, _filename: &str, _page_num: usize, _total_pages: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(PageCounter { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes a batch.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. With `page_concurrency > 1` the page events of one
/// document may arrive from several tasks, so implementations must be
/// `Send + Sync`.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called once a document has been rasterised and its page count is known.
    fn on_document_start(&self, filename: &str, total_pages: usize) {
        let _ = (filename, total_pages);
    }

    /// Called when a page was extracted into a mapping.
    fn on_page_complete(&self, filename: &str, page_num: usize, total_pages: usize) {
        let _ = (filename, page_num, total_pages);
    }

    /// Called when a page degraded to an error marker.
    fn on_page_error(&self, filename: &str, page_num: usize, total_pages: usize, error: String) {
        let _ = (filename, page_num, total_pages, error);
    }

    /// Called after a document's outputs were written.
    ///
    /// `structured_ok` is false when the structured output is an error marker.
    fn on_document_complete(&self, filename: &str, structured_ok: bool) {
        let _ = (filename, structured_ok);
    }

    /// Called when a document could not be rasterised.
    fn on_document_failed(&self, filename: &str, error: String) {
        let _ = (filename, error);
    }

    /// Called once after the archive was written.
    fn on_batch_complete(&self, completed: usize, failed: usize) {
        let _ = (completed, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
