//! Function discovery metadata and parameter validation.
//!
//! Registries describe parameters loosely, as `{name: {type, required,
//! default}}` with Python-style type names (`str`, `int`, `Optional[str]`,
//! `List[str]`). [`FunctionSpec::input_schema`] turns that into a JSON Schema
//! so proposed parameters can be checked with `jsonschema` before dispatch.

use crate::error::ValidationError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// One parameter as declared by the registry.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            required: true,
            ..Default::default()
        }
    }

    pub fn optional(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            required: false,
            ..Default::default()
        }
    }

    /// JSON Schema fragment for this parameter. Unknown type names produce an
    /// unconstrained schema rather than a guess.
    pub fn json_schema(&self) -> Value {
        let (base, nullable) = split_optional(self.kind.trim());
        let mut schema = match json_type_for(base) {
            Some(ty) if nullable => json!({ "type": [ty, "null"] }),
            Some(ty) => json!({ "type": ty }),
            None => json!({}),
        };
        if let Some(ref description) = self.description {
            schema["description"] = Value::String(description.clone());
        }
        schema
    }
}

/// Strip `Optional[...]` and report whether it was present.
fn split_optional(kind: &str) -> (&str, bool) {
    let lower_prefix = kind.get(..9).map(|p| p.eq_ignore_ascii_case("optional["));
    if lower_prefix == Some(true)
        && let Some(inner) = kind.get(9..).and_then(|rest| rest.strip_suffix(']'))
    {
        return (inner.trim(), true);
    }
    (kind, false)
}

fn json_type_for(kind: &str) -> Option<&'static str> {
    let lower = kind.to_ascii_lowercase();
    let head = lower.split('[').next().unwrap_or_default();
    match head {
        "str" | "string" => Some("string"),
        "int" | "integer" => Some("integer"),
        "float" | "number" | "double" => Some("number"),
        "bool" | "boolean" => Some("boolean"),
        "list" | "array" | "tuple" | "set" => Some("array"),
        "dict" | "object" | "mapping" => Some("object"),
        _ => None,
    }
}

/// Discovery metadata for one function.
///
/// List endpoints may return bare function names; those deserialize into a
/// spec with only `name` set.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub category: String,
    pub parameters: BTreeMap<String, ParamSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFunctionSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        parameters: BTreeMap<String, ParamSpec>,
    },
}

impl<'de> Deserialize<'de> for FunctionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawFunctionSpec::deserialize(deserializer)? {
            RawFunctionSpec::Name(name) => FunctionSpec {
                name,
                ..Default::default()
            },
            RawFunctionSpec::Full {
                name,
                description,
                category,
                parameters,
            } => FunctionSpec {
                name,
                description: description.unwrap_or_default(),
                category: category.unwrap_or_default(),
                parameters,
            },
        })
    }
}

impl FunctionSpec {
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a parameter (builder pattern).
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// JSON Schema for the parameter object. Undeclared parameters are
    /// rejected.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, param) in &self.parameters {
            properties.insert(name.clone(), param.json_schema());
            if param.required {
                required.push(Value::String(name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// One-line description for prompts, e.g.
    /// `- search(city: str, days?: int): Look up a forecast`.
    pub fn summary_line(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(name, p)| {
                let marker = if p.required { "" } else { "?" };
                if p.kind.is_empty() {
                    format!("{name}{marker}")
                } else {
                    format!("{name}{marker}: {}", p.kind)
                }
            })
            .collect();
        if self.description.is_empty() {
            format!("- {}({})", self.name, params.join(", "))
        } else {
            format!("- {}({}): {}", self.name, params.join(", "), self.description)
        }
    }
}

/// Validate proposed parameters against the function's declared schema.
pub fn validate_parameters(spec: &FunctionSpec, params: &Value) -> Result<(), ValidationError> {
    let tool = format!("{}.{}", spec.category, spec.name);
    if !params.is_object() {
        return Err(ValidationError::ParametersNotObject { tool });
    }

    let schema = spec.input_schema();
    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ValidationError::InvalidParameters {
            tool: tool.clone(),
            errors: vec![format!("  - declared schema is unusable: {e}")],
        })?;

    let errors: Vec<String> = validator
        .iter_errors(params)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::InvalidParameters { tool, errors })
    }
}
