//! Tool argument validation
//!
//! Validates decoded arguments against the JSON-schema subset used by tool
//! definitions: a top-level object with typed `properties` and a `required`
//! list. Unknown extra fields are tolerated; models routinely add them.

use serde_json::Value;

use crate::tools::registry::DESCRIPTION_FIELD;

/// Validate `args` against a tool parameter schema.
///
/// Returns the first violation as a human-readable reason.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let args_object = args
        .as_object()
        .ok_or_else(|| "arguments must be an object".to_string())?;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if name == DESCRIPTION_FIELD {
                continue;
            }
            if !args_object.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, value) in args_object {
            if name == DESCRIPTION_FIELD {
                continue;
            }
            let Some(spec) = properties.get(name) else {
                continue;
            };
            let Some(expected) = spec.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(format!(
                    "field '{name}' expected type '{expected}', got '{}'",
                    type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
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
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "count": {"type": "integer"},
                "tags": {"type": "array"}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn valid_args_pass() {
        validate_args(&schema(), &json!({"path": "a.txt", "count": 3})).unwrap();
    }

    #[test]
    fn missing_required_rejected() {
        let err = validate_args(&schema(), &json!({"count": 3})).unwrap_err();
        assert!(err.contains("path"));
    }

    #[test]
    fn type_mismatch_rejected() {
        let err = validate_args(&schema(), &json!({"path": 42})).unwrap_err();
        assert!(err.contains("expected type 'string'"));
    }

    #[test]
    fn extra_fields_tolerated() {
        validate_args(&schema(), &json!({"path": "a.txt", "surprise": true})).unwrap();
    }

    #[test]
    fn description_field_ignored() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path", "tool_description"]
        });
        validate_args(&schema, &json!({"path": "a.txt"})).unwrap();
    }

    #[test]
    fn non_object_args_rejected() {
        assert!(validate_args(&schema(), &json!("just a string")).is_err());
    }
}
