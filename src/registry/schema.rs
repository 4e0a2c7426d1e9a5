//! Argument validation against the tool input schemas.
//!
//! Supports the subset of JSON Schema the tool definitions use: `type`,
//! `required`, `properties`, `additionalProperties: false`, `enum`,
//! `items`, `minimum`/`maximum` and `minLength`.

use serde_json::{Map, Value};

/// Check `args` against an object schema, returning the first violation.
pub fn validate_arguments(schema: &Value, args: &Map<String, Value>) -> Result<(), String> {
    validate_object(schema, args, "")
}

fn validate_object(schema: &Value, object: &Map<String, Value>, path: &str) -> Result<(), String> {
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                return Err(format!("missing required field '{}{}'", path, name));
            }
        }
    }

    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in object {
        let field = format!("{}{}", path, key);
        match properties.and_then(|p| p.get(key)) {
            Some(prop_schema) => validate_value(prop_schema, value, &field)?,
            None if closed => return Err(format!("unexpected field '{}'", field)),
            None => {}
        }
    }

    Ok(())
}

fn validate_value(schema: &Value, value: &Value, field: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!(
                "field '{}' must be of type {}, got {}",
                field,
                expected,
                type_name(value)
            ));
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(format!("field '{}' must be one of {}", field, Value::Array(options.clone())));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("field '{}' must be >= {}", field, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("field '{}' must be <= {}", field, max));
            }
        }
    }

    if let (Some(s), Some(min)) = (value.as_str(), schema.get("minLength").and_then(Value::as_u64)) {
        if (s.chars().count() as u64) < min {
            return Err(format!("field '{}' must be at least {} characters", field, min));
        }
    }

    match value {
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item_schema, item, &format!("{}[{}]", field, i))?;
                }
            }
        }
        Value::Object(object) if schema.get("properties").is_some() => {
            validate_object(schema, object, &format!("{}.", field))?;
        }
        _ => {}
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
