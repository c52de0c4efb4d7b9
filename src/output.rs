//! Data types flowing through the pipeline and returned to callers.
//!
//! ```text
//! Document ──▶ PageImage* ──▶ ExtractionResult* ──▶ MergedRecord ──▶ StructuredRecord
//! ```
//!
//! Model-produced values stay as [`serde_json::Value`]: the pipeline makes no
//! claim about the fields an invoice contains. What *is* typed is whether a
//! step succeeded, so an error marker can never be mistaken for a section
//! called `"error"`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use crate::error::CapabilityError;
use crate::pipeline::response::json_kind;

/// Key used by every error-marker object.
pub const ERROR_KEY: &str = "error";

/// One uploaded PDF invoice.
#[derive(Debug, Clone)]
pub struct Document {
    /// Name the document was uploaded under, e.g. `"hotel_may.pdf"`.
    pub filename: String,
    /// Raw PDF bytes.
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// One rasterised page, PNG-encoded and base64-wrapped for the model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    /// Base64 (standard alphabet) of the PNG bytes.
    pub png_base64: String,
}

/// Result of extracting one page.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    /// Section name → fields, as returned by the model.
    Sections(Map<String, Value>),
    /// Message of the error marker.
    Error(String),
}

impl ExtractionResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ExtractionResult::Error(_))
    }

    /// The extracted mapping, `None` for error markers.
    pub fn sections(&self) -> Option<&Map<String, Value>> {
        match self {
            ExtractionResult::Sections(map) => Some(map),
            ExtractionResult::Error(_) => None,
        }
    }

    /// JSON form: the mapping itself, or `{"error": message}`.
    pub fn to_json(&self) -> Value {
        match self {
            ExtractionResult::Sections(map) => Value::Object(map.clone()),
            ExtractionResult::Error(msg) => json!({ ERROR_KEY: msg }),
        }
    }

    /// Classify a stored per-page JSON value.
    ///
    /// An object whose only key is a string `"error"` is an error marker;
    /// any other object is a page mapping; anything else is not a mapping
    /// and is kept as an error so merging skips it.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => match error_marker_message(&map) {
                Some(msg) => ExtractionResult::Error(msg.to_string()),
                None => ExtractionResult::Sections(map),
            },
            other => ExtractionResult::Error(
                CapabilityError::NotAnObject(json_kind(&other)).to_string(),
            ),
        }
    }
}

/// Union of all successful page mappings for one document.
pub type MergedRecord = Map<String, Value>;

/// Result of the schema transformation for one document.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredRecord {
    /// Object shaped to the target schema.
    Structured(Map<String, Value>),
    /// Message of the error marker, e.g. `"Transform Error: HTTP 500"`.
    Error(String),
}

impl StructuredRecord {
    pub fn is_error(&self) -> bool {
        matches!(self, StructuredRecord::Error(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            StructuredRecord::Structured(map) => Value::Object(map.clone()),
            StructuredRecord::Error(msg) => json!({ ERROR_KEY: msg }),
        }
    }
}

/// Message of a lone `{"error": "..."}` object, the shape of a failed page.
pub(crate) fn error_marker_message(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get(ERROR_KEY).and_then(Value::as_str)
}

/// Everything produced for one document, before persistence.
#[derive(Debug, Clone)]
pub struct DocumentRun {
    pub filename: String,
    /// Per-page results in page order.
    pub pages: Vec<ExtractionResult>,
    pub merged: MergedRecord,
    pub structured: StructuredRecord,
    pub duration_ms: u64,
}

impl DocumentRun {
    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.is_error()).count()
    }
}

/// Persisted result of one successfully rasterised document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub filename: String,
    pub page_count: usize,
    /// Pages whose extraction degraded to an error marker.
    pub failed_pages: usize,
    pub raw_path: PathBuf,
    pub structured_path: PathBuf,
    /// Set when the structured output is a `Transform Error` marker.
    pub transform_error: Option<String>,
    pub duration_ms: u64,
}

/// A document that could not be rasterised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub filename: String,
    pub error: String,
}

/// Outcome of one document within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Completed(DocumentReport),
    Failed(DocumentFailure),
}

impl DocumentOutcome {
    pub fn filename(&self) -> &str {
        match self {
            DocumentOutcome::Completed(r) => &r.filename,
            DocumentOutcome::Failed(f) => &f.filename,
        }
    }
}

/// Aggregate statistics for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub completed_documents: usize,
    pub failed_documents: usize,
    pub total_pages: usize,
    pub failed_pages: usize,
    pub transform_failures: usize,
    pub total_duration_ms: u64,
}

/// Everything a batch produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// One entry per input document, in input order.
    pub documents: Vec<DocumentOutcome>,
    /// Zip of every structured output written by this batch.
    pub archive_path: PathBuf,
    pub stats: BatchStats,
}

impl BatchResult {
    pub fn failures(&self) -> impl Iterator<Item = &DocumentFailure> {
        self.documents.iter().filter_map(|d| match d {
            DocumentOutcome::Failed(f) => Some(f),
            DocumentOutcome::Completed(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_marker_is_recognised() {
        let r = ExtractionResult::from_json(json!({"error": "OpenAI Error: timeout"}));
        assert_eq!(r, ExtractionResult::Error("OpenAI Error: timeout".into()));
        assert_eq!(r.to_json(), json!({"error": "OpenAI Error: timeout"}));
    }

    #[test]
    fn object_with_error_and_other_keys_is_a_mapping() {
        let r = ExtractionResult::from_json(json!({"error": "x", "Totals": {}}));
        assert!(!r.is_error());
    }

    #[test]
    fn non_object_is_not_a_mapping() {
        let r = ExtractionResult::from_json(json!([{"Totals": {}}]));
        assert!(r.is_error());
        assert!(r.sections().is_none());
    }

    #[test]
    fn outcome_serialises_with_status_tag() {
        let outcome = DocumentOutcome::Failed(DocumentFailure {
            filename: "a.pdf".into(),
            error: "corrupt".into(),
        });
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["filename"], "a.pdf");
    }
}
