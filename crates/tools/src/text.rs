//! `text` multitool: small deterministic string transformations.

use async_trait::async_trait;
use semloop_core::error::ToolError;
use semloop_core::tool::{SubAction, Tool, ToolCall, ToolResult};
use serde_json::json;

pub struct TextTool;

fn text_only_schema(description: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "text": { "type": "string", "description": description }
        },
        "required": ["text"]
    })
}

fn text_arg<'a>(call: &'a ToolCall, field: &str) -> Result<&'a str, ToolError> {
    call.arguments[field]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{field}' argument")))
}

#[async_trait]
impl Tool for TextTool {
    fn name(&self) -> &str {
        "text"
    }

    fn description(&self) -> &str {
        "String utilities"
    }

    fn sub_actions(&self) -> Vec<SubAction> {
        vec![
            SubAction {
                name: "upper".into(),
                description: "Convert text to upper case.".into(),
                parameters: text_only_schema("Text to convert"),
            },
            SubAction {
                name: "lower".into(),
                description: "Convert text to lower case.".into(),
                parameters: text_only_schema("Text to convert"),
            },
            SubAction {
                name: "word_count".into(),
                description: "Count the words, lines and characters in a text.".into(),
                parameters: text_only_schema("Text to measure"),
            },
            SubAction {
                name: "replace".into(),
                description: "Replace every occurrence of `from` with `to`.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "from": { "type": "string", "minLength": 1 },
                        "to": { "type": "string" }
                    },
                    "required": ["text", "from", "to"]
                }),
            },
        ]
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let text = text_arg(call, "text")?;
        match call.sub_action.as_deref() {
            Some("upper") => Ok(ToolResult::ok(&call.id, text.to_uppercase())),
            Some("lower") => Ok(ToolResult::ok(&call.id, text.to_lowercase())),
            Some("word_count") => {
                let words = text.split_whitespace().count();
                let lines = text.lines().count();
                let chars = text.chars().count();
                Ok(ToolResult::ok(&call.id, format!("{words} words, {lines} lines, {chars} characters"))
                    .with_data(json!({ "words": words, "lines": lines, "chars": chars })))
            }
            Some("replace") => {
                let from = text_arg(call, "from")?;
                let to = text_arg(call, "to")?;
                if from.is_empty() {
                    return Err(ToolError::InvalidArguments("'from' must not be empty".into()));
                }
                let replaced = text.matches(from).count();
                Ok(ToolResult::ok(&call.id, text.replace(from, to))
                    .with_data(json!({ "replacements": replaced })))
            }
            other => Err(ToolError::UnknownSubAction {
                tool_name: "text".into(),
                sub_action: other.unwrap_or_default().into(),
            }),
        }
    }
}
