//! Tool trait: the abstraction over callable capabilities.
//!
//! Tools are what give an agent the ability to act: evaluate maths, read
//! the clock, transform text. A tool is either a single action or a
//! *multitool* that declares several named sub-actions, each addressable
//! as `<tool>__<sub_action>` and each carrying its own input schema.
//!
//! The [`ToolRegistry`] is built once at startup and then shared
//! read-only (behind an `Arc`) by every run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use crate::error::ToolError;

/// Separator between a multitool's name and one of its sub-actions.
pub const SUB_ACTION_SEPARATOR: &str = "__";

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID
    pub id: String,

    /// Name of the tool (the parent name for multitools)
    pub name: String,

    /// Sub-action to dispatch to, for multitools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_action: Option<String>,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    /// A successful result with text output.
    pub fn ok(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// Attach structured data to the result.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// One named sub-action declared by a multitool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAction {
    pub name: String,
    pub description: String,
    /// JSON Schema for this sub-action's arguments.
    pub parameters: serde_json::Value,
}

/// The core Tool trait.
///
/// Single-action tools implement `parameters_schema`; multitools return
/// their sub-actions from `sub_actions` and dispatch on
/// [`ToolCall::sub_action`] inside `execute`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "clock", "math").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Sub-actions for multitools. Empty for single-action tools.
    fn sub_actions(&self) -> Vec<SubAction> {
        Vec::new()
    }

    /// Execute the tool with the given call.
    async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError>;
}

/// An addressable action: a single-action tool, or one sub-action of a
/// multitool sharing the parent's entry point.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Addressable name (`clock`, `math__evaluate`)
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// The parent tool's name
    pub tool_name: String,
    pub sub_action: Option<String>,
    entry: Arc<dyn Tool>,
}

impl ToolDescriptor {
    fn single(tool: &Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.parameters_schema(),
            tool_name: tool.name().to_string(),
            sub_action: None,
            entry: Arc::clone(tool),
        }
    }

    fn sub(tool: &Arc<dyn Tool>, sub: SubAction) -> Self {
        Self {
            name: format!("{}{SUB_ACTION_SEPARATOR}{}", tool.name(), sub.name),
            description: sub.description,
            input_schema: sub.parameters,
            tool_name: tool.name().to_string(),
            sub_action: Some(sub.name),
            entry: Arc::clone(tool),
        }
    }

    /// Invoke the underlying tool entry point with already-validated arguments.
    pub async fn invoke(
        &self,
        call_id: impl Into<String>,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError> {
        let call = ToolCall {
            id: call_id.into(),
            name: self.tool_name.clone(),
            sub_action: self.sub_action.clone(),
            arguments,
        };
        self.entry.execute(&call).await
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("tool_name", &self.tool_name)
            .field("sub_action", &self.sub_action)
            .finish()
    }
}

/// A registry of available tools.
///
/// Populated at startup, then wrapped in an `Arc` and only read.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::from(tool));
    }

    /// Look up an addressable action by name.
    ///
    /// A multitool is only reachable through its sub-actions; its bare
    /// name resolves to nothing.
    pub fn lookup(&self, name: &str) -> Option<ToolDescriptor> {
        if let Some(tool) = self.tools.get(name) {
            return tool
                .sub_actions()
                .is_empty()
                .then(|| ToolDescriptor::single(tool));
        }

        let (tool_name, sub_name) = name.split_once(SUB_ACTION_SEPARATOR)?;
        let tool = self.tools.get(tool_name)?;
        tool.sub_actions()
            .into_iter()
            .find(|s| s.name == sub_name)
            .map(|s| ToolDescriptor::sub(tool, s))
    }

    /// All addressable actions, with multitools expanded.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.values().flat_map(Self::expand).collect()
    }

    fn expand(tool: &Arc<dyn Tool>) -> Vec<ToolDescriptor> {
        let subs = tool.sub_actions();
        if subs.is_empty() {
            vec![ToolDescriptor::single(tool)]
        } else {
            subs.into_iter()
                .map(|s| ToolDescriptor::sub(tool, s))
                .collect()
        }
    }

    /// Select the tool set for one run.
    ///
    /// Each name may be a registered tool (a multitool contributes all its
    /// sub-actions) or a single addressable sub-action. An empty selection
    /// means every registered action.
    pub fn select(&self, names: &[String]) -> std::result::Result<ToolSet, ToolError> {
        if names.is_empty() {
            return Ok(ToolSet::new(self.list()));
        }

        let mut selected: Vec<ToolDescriptor> = Vec::new();
        for name in names {
            let found = match self.tools.get(name.as_str()) {
                Some(tool) => Self::expand(tool),
                None => self
                    .lookup(name)
                    .map(|d| vec![d])
                    .ok_or_else(|| ToolError::NotFound(name.clone()))?,
            };
            for descriptor in found {
                if !selected.iter().any(|d| d.name == descriptor.name) {
                    selected.push(descriptor);
                }
            }
        }
        Ok(ToolSet::new(selected))
    }

    /// List all registered tool names (parents, not expanded).
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The tools one run may call, in listing order.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    descriptors: Vec<ToolDescriptor>,
}

impl ToolSet {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
