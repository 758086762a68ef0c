use core_tools::ToolArgs;

/// Structural validation of `args` against a tool's declared JSON schema:
/// every `required` key is present, and each present key's value matches the
/// schema's declared `type`. Deliberately shallow — one level of `properties`
/// and primitive type tags — since the schemas `schemars` generates for this
/// core's tools never nest past an object of scalars/arrays.
pub fn validate_args(schema: &serde_json::Value, args: &ToolArgs) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
        for key in required {
            let Some(key) = key.as_str() else { continue };
            if !args.contains_key(key) {
                return Err(format!("missing required argument '{key}'"));
            }
        }
    }

    let Some(properties) = schema_obj.get("properties").and_then(|v| v.as_object()) else {
        return Ok(());
    };

    for (key, value) in args {
        let Some(prop_schema) = properties.get(key) else {
            continue;
        };
        let Some(expected_type) = prop_schema.get("type").and_then(|v| v.as_str()) else {
            continue;
        };
        if !type_matches(expected_type, value) {
            return Err(format!(
                "argument '{key}' has the wrong type: expected {expected_type}, got {}",
                type_name(value)
            ));
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "count": { "type": "integer" },
            },
            "required": ["path"],
        })
    }

    #[test]
    fn missing_required_key_fails() {
        let args = ToolArgs::new();
        assert!(validate_args(&schema(), &args).is_err());
    }

    #[test]
    fn present_required_key_passes() {
        let mut args = ToolArgs::new();
        args.insert("path".into(), serde_json::json!("a.txt"));
        assert!(validate_args(&schema(), &args).is_ok());
    }

    #[test]
    fn wrong_type_fails() {
        let mut args = ToolArgs::new();
        args.insert("path".into(), serde_json::json!("a.txt"));
        args.insert("count".into(), serde_json::json!("not a number"));
        assert!(validate_args(&schema(), &args).is_err());
    }

    #[test]
    fn unconstrained_schema_passes_anything() {
        let schema = serde_json::json!({ "type": "object" });
        let mut args = ToolArgs::new();
        args.insert("whatever".into(), serde_json::json!(42));
        assert!(validate_args(&schema, &args).is_ok());
    }
}
