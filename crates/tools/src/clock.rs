//! Clock tool: the current date and time.

use async_trait::async_trait;
use chrono::{FixedOffset, SecondsFormat, Utc};
use semloop_core::error::ToolError;
use semloop_core::tool::{Tool, ToolCall, ToolResult};
use serde_json::json;

pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally shifted to a UTC offset in hours."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "offset_hours": {
                    "type": "number",
                    "minimum": -14,
                    "maximum": 14,
                    "description": "Offset from UTC in hours, e.g. 5.5 for India (default: 0)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let offset_hours = call.arguments["offset_hours"].as_f64().unwrap_or(0.0);
        let offset = FixedOffset::east_opt((offset_hours * 3600.0).round() as i32).ok_or_else(|| {
            ToolError::InvalidArguments(format!("offset_hours out of range: {offset_hours}"))
        })?;

        let now = Utc::now().with_timezone(&offset);
        let output = now.to_rfc3339_opts(SecondsFormat::Secs, false);
        Ok(ToolResult::ok(&call.id, output).with_data(json!({
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M:%S").to_string(),
            "weekday": now.format("%A").to_string(),
            "unix": now.timestamp(),
        })))
    }
}
