//! Error types for the invoice2json library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`InvoiceError`]: **Fatal**: a document (or the whole batch) cannot
//!   proceed at all: the file is not a PDF, the target schema is missing,
//!   no model provider is configured, an output file cannot be written.
//!   Returned as `Err(InvoiceError)`.
//!
//! * [`CapabilityError`]: **Non-fatal**: one model call failed or answered
//!   with something that is not a JSON object. It never crosses a component
//!   boundary as an `Err`; the extractor and transformer turn it into an
//!   error-marker object (`{"error": "..."}`) so the batch keeps going.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the invoice2json library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a usable file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The document was read, but is not a PDF.
    #[error("Document '{filename}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { filename: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{filename}' is corrupt: {detail}")]
    CorruptPdf { filename: String, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page} of '{filename}': {detail}")]
    RasterisationFailed {
        filename: String,
        page: usize,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or point PDFIUM_LIB_PATH at the\n\
directory that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Schema errors ─────────────────────────────────────────────────────
    /// The target schema file does not exist.
    #[error("Target schema not found: '{path}'")]
    SchemaNotFound { path: PathBuf },

    /// The target schema exists but is not a JSON object.
    #[error("Target schema '{path}' is invalid: {detail}")]
    InvalidSchema { path: PathBuf, detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output file or directory.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not build the zip archive.
    #[error("Failed to build archive '{path}': {detail}")]
    ArchiveFailed { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvoiceError {
    /// True for errors scoped to a single document, after which the
    /// remaining documents of a batch can still be processed.
    pub fn is_document_level(&self) -> bool {
        matches!(
            self,
            InvoiceError::NotAPdf { .. }
                | InvoiceError::CorruptPdf { .. }
                | InvoiceError::RasterisationFailed { .. }
        )
    }
}

/// A non-fatal failure of one model call.
///
/// The `Display` form is the message embedded in error markers, e.g.
/// `{"error": "OpenAI Error: <display>"}`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    /// The provider call itself failed (network, HTTP status, auth, quota).
    #[error("{0}")]
    Provider(String),

    /// The provider answered with an empty body.
    #[error("empty response from model")]
    EmptyResponse,

    /// The response text is not valid JSON.
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    /// The response is valid JSON but not an object at the top level.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterisation_failed_display() {
        let e = InvoiceError::RasterisationFailed {
            filename: "hotel.pdf".into(),
            page: 3,
            detail: "bad stream".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 3"), "got: {msg}");
        assert!(msg.contains("hotel.pdf"), "got: {msg}");
    }

    #[test]
    fn document_level_classification() {
        let corrupt = InvoiceError::CorruptPdf {
            filename: "a.pdf".into(),
            detail: "xref".into(),
        };
        assert!(corrupt.is_document_level());

        let schema = InvoiceError::SchemaNotFound {
            path: PathBuf::from("schema.json"),
        };
        assert!(!schema.is_document_level());
    }

    #[test]
    fn capability_error_display_is_bare_message() {
        let e = CapabilityError::Provider("HTTP 503 Service Unavailable".into());
        assert_eq!(e.to_string(), "HTTP 503 Service Unavailable");
        assert_eq!(
            CapabilityError::NotAnObject("array").to_string(),
            "expected a JSON object, got array"
        );
    }
}
