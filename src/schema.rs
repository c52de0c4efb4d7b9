//! The target schema every structured record is shaped to.
//!
//! The schema file is a JSON object *template*: its keys are the destination
//! fields and nested objects describe nested fields, e.g.
//!
//! ```json
//! { "invoice_number": null, "guest": { "name": null, "check_in": null } }
//! ```
//!
//! It is loaded once per batch and shared read-only by every document. A
//! missing or malformed schema is fatal for the whole batch.

use crate::error::InvoiceError;
use crate::pipeline::response::json_kind;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A loaded target schema.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSchema {
    path: PathBuf,
    fields: Map<String, Value>,
}

impl TargetSchema {
    /// Read and validate the schema file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, InvoiceError> {
        let path = path.as_ref().to_path_buf();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InvoiceError::SchemaNotFound { path });
            }
            Err(e) => {
                return Err(InvoiceError::InvalidSchema {
                    path,
                    detail: e.to_string(),
                });
            }
        };

        let value: Value = serde_json::from_str(&text).map_err(|e| InvoiceError::InvalidSchema {
            path: path.clone(),
            detail: e.to_string(),
        })?;

        let schema = Self::from_value(path, value)?;
        debug!(
            "Loaded target schema {} ({} top-level fields)",
            schema.path.display(),
            schema.fields.len()
        );
        Ok(schema)
    }

    /// Build a schema from an already parsed value.
    pub fn from_value(path: impl Into<PathBuf>, value: Value) -> Result<Self, InvoiceError> {
        let path = path.into();
        match value {
            Value::Object(fields) => {
                if fields.is_empty() {
                    warn!(
                        "Schema {} has no fields; structured outputs will be empty",
                        path.display()
                    );
                }
                Ok(Self { path, fields })
            }
            other => Err(InvoiceError::InvalidSchema {
                path,
                detail: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The schema as a JSON value, for embedding in prompts.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Shape a model answer to the schema's field set.
    ///
    /// Top-level keys are put in schema order and keys the schema does not
    /// name are dropped. Fields the model left out are filled with `null`,
    /// recursing into nested objects. Values themselves are never rewritten.
    pub fn conform(&self, mut record: Map<String, Value>) -> Map<String, Value> {
        let mut shaped = Map::with_capacity(self.fields.len());
        for (key, field_schema) in &self.fields {
            let value = record
                .remove(key)
                .unwrap_or_else(|| null_skeleton(field_schema));
            shaped.insert(key.clone(), value);
        }

        if !record.is_empty() {
            let dropped: Vec<&str> = record.keys().map(String::as_str).collect();
            warn!("Dropped top-level keys not in schema: {:?}", dropped);
        }

        fill_missing(&mut shaped, &self.fields);
        shaped
    }
}

/// `null` for leaf fields; an object of nulls for nested objects.
fn null_skeleton(field_schema: &Value) -> Value {
    match field_schema {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), null_skeleton(v)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn fill_missing(target: &mut Map<String, Value>, schema: &Map<String, Value>) {
    for (key, field_schema) in schema {
        if !target.contains_key(key) {
            target.insert(key.clone(), null_skeleton(field_schema));
            continue;
        }
        if let (Some(Value::Object(nested)), Value::Object(nested_schema)) =
            (target.get_mut(key), field_schema)
        {
            fill_missing(nested, nested_schema);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TargetSchema {
        TargetSchema::from_value(
            "schema.json",
            json!({
                "invoice_number": null,
                "guest": {"name": null, "check_in": null},
                "totals": {"amount": null, "currency": null}
            }),
        )
        .unwrap()
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn conform_drops_unknown_top_level_keys() {
        let shaped = schema().conform(obj(json!({"invoice_number": "F-1", "notes": "x"})));
        assert!(!shaped.contains_key("notes"));
        assert!(shaped.keys().all(|k| schema().fields().contains_key(k)));
    }

    #[test]
    fn conform_null_fills_missing_fields_recursively() {
        let shaped = schema().conform(obj(json!({"guest": {"name": "A. Guest"}})));
        assert_eq!(
            Value::Object(shaped),
            json!({
                "invoice_number": null,
                "guest": {"name": "A. Guest", "check_in": null},
                "totals": {"amount": null, "currency": null}
            })
        );
    }

    #[test]
    fn conform_keeps_values_and_nested_extras() {
        let shaped = schema().conform(obj(json!({
            "totals": {"amount": 12.5, "currency": "EUR", "rounding": 0}
        })));
        assert_eq!(shaped["totals"]["amount"], 12.5);
        assert_eq!(shaped["totals"]["rounding"], 0);
    }

    #[test]
    fn conform_orders_keys_like_schema() {
        let shaped = schema().conform(obj(json!({"totals": {}, "invoice_number": "1"})));
        let keys: Vec<&str> = shaped.keys().map(String::as_str).collect();
        assert_eq!(keys, ["invoice_number", "guest", "totals"]);
    }

    #[test]
    fn non_object_schema_is_rejected() {
        let err = TargetSchema::from_value("s.json", json!([1])).unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidSchema { .. }));
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn empty_object_schema_conforms_to_empty_record() {
        let schema = TargetSchema::from_value("schema.json", json!({})).unwrap();
        assert!(schema.fields().is_empty());
        assert!(schema.conform(obj(json!({"guest": {"name": "A"}}))).is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_schema_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = TargetSchema::load(tmp.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, InvoiceError::SchemaNotFound { .. }));
    }

    #[tokio::test]
    async fn malformed_file_is_invalid_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("schema.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = TargetSchema::load(&path).await.unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidSchema { .. }));
    }

    #[tokio::test]
    async fn load_reads_object() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("schema.json");
        std::fs::write(&path, r#"{"invoice_number": null}"#).unwrap();
        let schema = TargetSchema::load(&path).await.unwrap();
        assert_eq!(schema.fields().len(), 1);
        assert_eq!(schema.path(), path.as_path());
    }
}
