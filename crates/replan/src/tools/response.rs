//! Validation of Tool Registry execute responses.
//!
//! The wire shape is:
//!
//! ```json
//! {"function_name": "search", "success": true, "result": "{\"success\": true, \"rain_chance\": 75}"}
//! ```
//!
//! The wrapper's `success` drives control flow. The inner payload is a
//! string-encoded JSON object that must carry its own boolean `success`.

use super::ToolId;
use crate::error::ToolExecutionError;
use serde_json::{Value, json};
use std::sync::LazyLock;

static WRAPPER_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "required": ["function_name", "success"],
        "properties": {
            "function_name": {"type": "string"},
            "success": {"type": "boolean"},
            "result": {"type": ["string", "null"]},
            "error": {"type": ["string", "null"]}
        }
    })
});

static PAYLOAD_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "required": ["success"],
        "properties": {"success": {"type": "boolean"}}
    })
});

/// Build a wrapper the way registries do. Used by in-process registries.
pub fn wrap_payload(function_name: &str, payload: &Value) -> Value {
    let success = payload
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    json!({
        "function_name": function_name,
        "success": success,
        "result": payload.to_string(),
    })
}

/// Build a failure wrapper with no payload.
pub fn wrap_error(function_name: &str, error: &str) -> Value {
    json!({
        "function_name": function_name,
        "success": false,
        "result": null,
        "error": error,
    })
}

fn check(schema: &Value, value: &Value, what: &str) -> Result<(), ToolExecutionError> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| ToolExecutionError::MalformedResponse(format!("{what} schema: {e}")))?;
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolExecutionError::MalformedResponse(format!(
            "{what}: {}",
            errors.join("; ")
        )))
    }
}

/// Validate a raw execute response for `tool` and return the inner payload.
///
/// A wrapper with `success: false` becomes [`ToolExecutionError::Reported`].
/// Anything that does not match the expected shape is
/// [`ToolExecutionError::MalformedResponse`].
pub fn unwrap_payload(raw: &Value, tool: &ToolId) -> Result<Value, ToolExecutionError> {
    check(&WRAPPER_SCHEMA, raw, "response wrapper")?;

    let function_name = raw["function_name"].as_str().unwrap_or_default();
    if function_name != tool.function {
        return Err(ToolExecutionError::MalformedResponse(format!(
            "response is for '{function_name}', expected '{}'",
            tool.function
        )));
    }

    let encoded = raw.get("result").and_then(Value::as_str);
    let success = raw["success"].as_bool().unwrap_or(false);

    if !success {
        let detail = raw
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| encoded.map(str::to_string))
            .unwrap_or_else(|| "success=false".to_string());
        return Err(ToolExecutionError::Reported {
            function: function_name.to_string(),
            detail,
        });
    }

    let encoded = encoded.ok_or_else(|| {
        ToolExecutionError::MalformedResponse("successful response has no result".into())
    })?;
    let payload: Value = serde_json::from_str(encoded).map_err(|e| {
        ToolExecutionError::MalformedResponse(format!("result is not valid JSON: {e}"))
    })?;
    check(&PAYLOAD_SCHEMA, &payload, "result payload")?;
    Ok(payload)
}
