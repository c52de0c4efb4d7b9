//! Schema transformation: merged record + target schema → structured record.
//!
//! The model is asked to translate values, null-fill absent fields, normalise
//! dates and keep to the schema's field set. Whatever it answers is then
//! passed through [`TargetSchema::conform`], so a successful record never
//! carries a top-level key the schema does not name.
//!
//! Any failure becomes `{"error": "Transform Error: <message>"}`; the marker
//! is still written to disk and packaged like a normal result.

use crate::capability::{JsonCapability, JsonRequest};
use crate::config::PipelineConfig;
use crate::output::{MergedRecord, StructuredRecord};
use crate::pipeline::response::parse_json_object;
use crate::prompts::{transform_system_prompt, transform_user_prompt};
use crate::schema::TargetSchema;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Sends merged records to the transformation capability.
pub struct SchemaTransformer {
    capability: Arc<dyn JsonCapability>,
    target_language: String,
}

impl SchemaTransformer {
    pub fn new(capability: Arc<dyn JsonCapability>, config: &PipelineConfig) -> Self {
        Self {
            capability,
            target_language: config.target_language.clone(),
        }
    }

    pub async fn transform(&self, merged: &MergedRecord, schema: &TargetSchema) -> StructuredRecord {
        let start = Instant::now();
        let request = JsonRequest {
            system_prompt: transform_system_prompt(&schema.to_value(), &self.target_language),
            user_text: transform_user_prompt(&Value::Object(merged.clone())),
            image: None,
        };

        let outcome = self
            .capability
            .complete_json(&request)
            .await
            .and_then(|text| parse_json_object(&text));

        match outcome {
            Ok(answer) => {
                let shaped = schema.conform(answer);
                debug!("Transform: {} fields in {:?}", shaped.len(), start.elapsed());
                StructuredRecord::Structured(shaped)
            }
            Err(e) => {
                let message = format!("Transform Error: {}", e);
                warn!("{}", message);
                StructuredRecord::Error(message)
            }
        }
    }
}
