//! Shared test helpers for loop tests.

use semloop_core::error::{ProviderError, ToolError};
use semloop_core::message::Message;
use semloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use semloop_core::tool::{Tool, ToolCall, ToolRegistry, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A provider that plays back scripted replies.
///
/// Each call to `complete` pops the next reply. Once the script is
/// exhausted the `repeat` reply (if any) is returned forever; otherwise
/// the provider panics.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    repeat: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            repeat: None,
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Successful text replies, in order.
    pub fn replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    /// Always reply with `text`.
    pub fn always(text: &str) -> Self {
        Self::new(Vec::new()).repeating(text)
    }

    pub fn repeating(mut self, text: &str) -> Self {
        self.repeat = Some(text.to_string());
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// Transcripts received so far, one per call.
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.prompts.lock().unwrap().push(request.messages.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let reply = match (next, &self.repeat) {
            (Some(reply), _) => reply,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => panic!("ScriptedProvider: script exhausted"),
        };

        reply.map(|content| ProviderResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: request.model,
        })
    }
}

/// A tool that always fails.
pub struct BrokenTool;

#[async_trait::async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _call: &ToolCall) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// A tool that never answers within any reasonable timeout.
pub struct SlowTool;

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Takes an hour"
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ToolResult::ok(&call.id, "done"))
    }
}

/// Built-in tools plus the failing test tools.
pub fn test_registry() -> ToolRegistry {
    let mut registry = semloop_tools::default_registry();
    registry.register(Box::new(BrokenTool));
    registry.register(Box::new(SlowTool));
    registry
}
