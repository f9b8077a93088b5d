//! Action resolution: turn a parsed `Action{name, raw_input}` into a
//! validated [`ActionRequest`], or explain why it cannot be done.

use semloop_core::error::{ResolutionError, ToolError};
use semloop_core::tool::{ToolDescriptor, ToolResult, ToolSet};
use semloop_parsers::{balance_brackets, fix_bools};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// A tool request whose arguments already passed schema validation.
///
/// Only [`ActionResolver::resolve`] can build one, so dispatch never sees
/// unvalidated text.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    tool_name: String,
    args: Value,
    #[serde(skip)]
    descriptor: ToolDescriptor,
}

impl ActionRequest {
    /// Addressable action name (`math__evaluate`).
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub(crate) async fn dispatch(&self, call_id: &str) -> Result<ToolResult, ToolError> {
        self.descriptor.invoke(call_id, self.args.clone()).await
    }
}

pub struct ActionResolver;

impl ActionResolver {
    /// Match `name` against the run's tool set and coerce `raw_input` to the
    /// descriptor's input schema.
    pub fn resolve(
        tools: &ToolSet,
        name: &str,
        raw_input: Option<&str>,
    ) -> Result<ActionRequest, ResolutionError> {
        let descriptor = tools
            .get(name)
            .ok_or_else(|| ResolutionError::UnknownAction {
                name: name.to_string(),
                available: tools.names(),
            })?;

        let args = coerce(descriptor, raw_input)?;
        validate(descriptor, &args)?;

        debug!(tool = %descriptor.name, "Action resolved");
        Ok(ActionRequest {
            tool_name: descriptor.name.clone(),
            args,
            descriptor: descriptor.clone(),
        })
    }
}

fn coerce(descriptor: &ToolDescriptor, raw_input: Option<&str>) -> Result<Value, ResolutionError> {
    let Some(raw) = raw_input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Value::Object(Default::default()));
    };

    if raw.starts_with('{') || raw.starts_with('[') {
        return match parse_structured(raw) {
            Some(value @ Value::Object(_)) => Ok(value),
            Some(_) => Err(mismatch(descriptor, "input must be a JSON object, not an array")),
            None => Err(mismatch(descriptor, "input is not valid JSON")),
        };
    }

    match single_string_property(&descriptor.input_schema) {
        Some(field) => Ok(serde_json::json!({ field: raw })),
        None => Err(mismatch(
            descriptor,
            "input must be a JSON object matching the input schema",
        )),
    }
}

fn parse_structured(raw: &str) -> Option<Value> {
    let balanced = balance_brackets(raw);
    serde_json::from_str(&balanced.text)
        .ok()
        .or_else(|| serde_json::from_str(&fix_bools(&balanced.text).text).ok())
}

/// The property name when the schema declares exactly one property and it is a string.
fn single_string_property(schema: &Value) -> Option<&str> {
    let properties = schema.get("properties")?.as_object()?;
    if properties.len() != 1 {
        return None;
    }
    let (name, property) = properties.iter().next()?;
    (property.get("type").and_then(Value::as_str) == Some("string")).then_some(name.as_str())
}

fn validate(descriptor: &ToolDescriptor, args: &Value) -> Result<(), ResolutionError> {
    let validator = jsonschema::validator_for(&descriptor.input_schema).map_err(|e| {
        ResolutionError::InvalidSchema {
            action: descriptor.name.clone(),
            reason: e.to_string(),
        }
    })?;

    let violations: Vec<String> = validator
        .iter_errors(args)
        .map(|error| {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                error.to_string()
            } else {
                format!("{error} at {path}")
            }
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ResolutionError::SchemaMismatch {
            action: descriptor.name.clone(),
            violations,
        })
    }
}

fn mismatch(descriptor: &ToolDescriptor, violation: &str) -> ResolutionError {
    ResolutionError::SchemaMismatch {
        action: descriptor.name.clone(),
        violations: vec![violation.to_string()],
    }
}
