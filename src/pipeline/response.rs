//! Response decoding: model text → JSON object.
//!
//! JSON mode is requested on every call, yet some providers (and most local
//! models) still wrap the answer in a ```` ```json ```` fence or ignore the
//! mode entirely. The fence is stripped before parsing; anything that still
//! is not a JSON object becomes a [`CapabilityError`].

use crate::error::CapabilityError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\n(.*?)\n?```$").unwrap());

/// Remove one outer Markdown code fence, if present.
pub fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str().trim()),
        None => trimmed,
    }
}

/// Parse model output as a top-level JSON object.
pub fn parse_json_object(text: &str) -> Result<Map<String, Value>, CapabilityError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(CapabilityError::EmptyResponse);
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(CapabilityError::NotAnObject(json_kind(&other))),
        Err(e) => Err(CapabilityError::InvalidJson(e.to_string())),
    }
}

/// Short name of a JSON value's type, for error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object_parses() {
        let map = parse_json_object(r#"{"Totals": {"amount": "10"}}"#).unwrap();
        assert_eq!(map["Totals"]["amount"], "10");
    }

    #[test]
    fn fenced_object_parses() {
        let text = "```json\n{\"Guest Info\": {\"name\": null}}\n```";
        let map = parse_json_object(text).unwrap();
        assert!(map["Guest Info"]["name"].is_null());
    }

    #[test]
    fn bare_fence_without_language_parses() {
        let text = "  ```\n{\"a\": 1}\n```  ";
        assert_eq!(parse_json_object(text).unwrap()["a"], 1);
    }

    #[test]
    fn array_is_rejected() {
        assert_eq!(
            parse_json_object("[1, 2]").unwrap_err(),
            CapabilityError::NotAnObject("array")
        );
    }

    #[test]
    fn prose_is_invalid_json() {
        let err = parse_json_object("Sorry, I cannot read this invoice.").unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidJson(_)));
    }

    #[test]
    fn whitespace_is_empty_response() {
        assert_eq!(
            parse_json_object("   \n ").unwrap_err(),
            CapabilityError::EmptyResponse
        );
    }
}
