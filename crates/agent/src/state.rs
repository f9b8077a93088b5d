//! Execution state of one run: the state machine position, the append-only
//! step sequence and the counters that bound it.

use chrono::{DateTime, Utc};
use semloop_core::event::ExecutionId;
use semloop_core::message::Message;
use semloop_core::provider::Usage;
use semloop_core::tool::{ToolResult, ToolSet};
use semloop_parsers::ParseResult;
use serde::{Deserialize, Serialize};

use crate::resolver::ActionRequest;

/// Position in the reasoning state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Thinking,
    Acting,
    Observing,
    Finished,
    Failed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// What a step produced for the transcript: a tool result, a tool error,
/// or a synthetic corrective message written by the loop itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub is_error: bool,
    /// Written by the loop rather than returned by a tool.
    pub synthetic: bool,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn from_tool(result: ToolResult) -> Self {
        Self {
            content: result.output,
            data: result.data,
            is_error: !result.success,
            synthetic: false,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            data: None,
            is_error: true,
            synthetic: false,
            timestamp: Utc::now(),
        }
    }

    /// Corrective message for a failed model call, parse or resolution.
    pub fn synthetic(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            data: None,
            is_error: true,
            synthetic: true,
            timestamp: Utc::now(),
        }
    }

    /// Reviewer critique of an answer that was not accepted.
    pub fn revision(critique: impl Into<String>) -> Self {
        Self {
            is_error: false,
            ..Self::synthetic(critique)
        }
    }
}

/// One THINKING entry and everything that followed from it.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub index: usize,
    /// The transcript sent to the model. Not serialized: it repeats every
    /// earlier step.
    #[serde(skip)]
    pub prompt: Vec<Message>,
    /// Unmodified model output; absent when the model call itself failed.
    pub raw_output: Option<String>,
    pub parse_result: Option<ParseResult>,
    pub action: Option<ActionRequest>,
    pub observation: Option<Observation>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(index: usize, prompt: Vec<Message>) -> Self {
        Self {
            index,
            prompt,
            raw_output: None,
            parse_result: None,
            action: None,
            observation: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Why a run ended in FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("cancelled")]
    Cancelled,

    #[error("iteration budget exhausted after {max_iterations} iterations")]
    IterationBudgetExceeded { max_iterations: usize },

    #[error("retry budget exhausted after {max_retries} consecutive failures; last: {last_error}")]
    RetryBudgetExceeded {
        max_retries: usize,
        last_error: String,
    },

    #[error("run exceeded its wall-clock budget of {budget_secs}s")]
    WallClockExceeded { budget_secs: u64 },

    #[error("model call failed: {message}")]
    Provider { message: String },

    #[error("action could not be resolved: {message}")]
    Resolution { message: String },

    #[error("model output could not be parsed: {message}")]
    Parse { message: String },
}

impl FailureReason {
    /// Whether the run ran out of a budget rather than hitting an error.
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(
            self,
            Self::IterationBudgetExceeded { .. }
                | Self::RetryBudgetExceeded { .. }
                | Self::WallClockExceeded { .. }
        )
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Finished { answer: String },
    Failed { reason: FailureReason },
}

/// Mutable state of one run, owned by the controller.
#[derive(Debug)]
pub struct ExecutionState {
    pub execution_id: ExecutionId,
    pub goal: String,
    pub state: LoopState,
    pub steps: Vec<Step>,
    pub tools: ToolSet,
    /// THINKING entries so far.
    pub iterations: usize,
    /// Retriable failures since the last tool dispatch.
    pub consecutive_retries: usize,
    pub usage: Usage,
    next_sequence: u64,
}

impl ExecutionState {
    pub fn new(execution_id: ExecutionId, goal: impl Into<String>, tools: ToolSet) -> Self {
        Self {
            execution_id,
            goal: goal.into(),
            state: LoopState::Thinking,
            steps: Vec::new(),
            tools,
            iterations: 0,
            consecutive_retries: 0,
            usage: Usage::default(),
            next_sequence: 0,
        }
    }

    /// Next event sequence number for this run.
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}
