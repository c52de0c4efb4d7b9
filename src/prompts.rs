//! Prompts for the extraction and transformation model calls.
//!
//! Kept in one place so wording changes never touch orchestration code, and
//! so unit tests can check the instructions without calling a model.
//! The extraction prompt can be overridden through
//! [`crate::config::PipelineConfig::extraction_prompt`].

use serde_json::Value;

/// System prompt sent with every page image.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"Extract all data from this hotel invoice as structured JSON.
Group by logical sections like: Guest Info, Charges, Taxes, Totals, etc.
Include blank fields as null. Do not guess. If a section is empty, return {} for it.
Respond with a single JSON object and nothing else."#;

/// User text accompanying the page image.
pub const EXTRACTION_USER_PROMPT: &str = "Extract invoice data as structured JSON";

/// Date layout the transformation asks for.
pub const DATE_FORMAT: &str = "YYYY-MM-DD";

/// Build the transformation system prompt for `schema`.
///
/// The schema is embedded pretty-printed so the model sees its nesting.
pub fn transform_system_prompt(schema: &Value, target_language: &str) -> String {
    let schema_text = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "Reformat OCR invoice data into this fixed schema:\n\
         - Translate all values to {target_language}.\n\
         - Use null for missing fields.\n\
         - Format dates as {DATE_FORMAT}.\n\
         - Only include what is in the schema; add no other top-level keys.\n\
         - Strictly follow this schema:\n\
         {schema_text}\n\
         Respond with a single JSON object and nothing else."
    )
}

/// Build the transformation user message carrying the merged record.
pub fn transform_user_prompt(merged: &Value) -> String {
    format!("Raw JSON:\n{merged}")
}
