//! Run submission: the one entry point external callers use to start a run.

use semloop_config::AppConfig;
use semloop_core::error::ToolError;
use semloop_core::event::{EventBroadcaster, ExecutionId};
use semloop_core::provider::Provider;
use semloop_core::tool::ToolRegistry;
use semloop_parsers::{ActionParser, OutputParser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::controller::{LoopSettings, ReasoningLoop, RunOutcome};
use crate::evaluation::{ModelEvaluator, SelfEvaluator};

/// A request to start one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub goal: String,
    /// Tools (or single sub-actions) the run may call. Empty means all.
    #[serde(default, alias = "toolNames")]
    pub tool_names: Vec<String>,
    #[serde(default, alias = "maxIterations")]
    pub max_iterations: Option<usize>,
    #[serde(default, alias = "maxRetries")]
    pub max_retries: Option<usize>,
}

impl RunRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            tool_names: Vec::new(),
            max_iterations: None,
            max_retries: None,
        }
    }

    pub fn with_tools(mut self, names: &[&str]) -> Self {
        self.tool_names = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// A request rejected before any run started.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("goal must not be empty")]
    EmptyGoal,

    #[error(transparent)]
    UnknownTool(#[from] ToolError),

    #[error("invalid budget: {0}")]
    InvalidBudget(String),
}

/// Starts runs against a shared tool registry and event broadcaster.
///
/// Cheap to share behind an `Arc`; every submitted run gets its own
/// execution state.
pub struct AgentRunner {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    events: Arc<EventBroadcaster>,
    settings: LoopSettings,
    parser: Arc<dyn OutputParser>,
    evaluator: Option<Arc<dyn SelfEvaluator>>,
}

impl AgentRunner {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            provider,
            registry,
            events,
            settings: LoopSettings::default(),
            parser: Arc::new(ActionParser::default()),
            evaluator: None,
        }
    }

    /// Budgets, no-marker policy and self-evaluation from configuration.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        let settings = LoopSettings::from_config(config);
        let mut runner = Self::new(provider.clone(), registry, events)
            .with_parser(Arc::new(ActionParser::new(config.agent.no_marker_policy)));

        if config.agent.self_evaluation {
            let evaluator = ModelEvaluator::new(provider, settings.model.clone())
                .with_timeout(settings.model_timeout);
            runner = runner.with_evaluator(Arc::new(evaluator));
        }
        runner.with_settings(settings)
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn SelfEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run a request to completion.
    pub async fn submit(&self, request: RunRequest) -> Result<RunOutcome, SubmitError> {
        self.submit_with_cancel(request, CancellationToken::new()).await
    }

    /// Run a request to completion, stopping early if `cancel` fires.
    pub async fn submit_with_cancel(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, SubmitError> {
        let goal = request.goal.trim();
        if goal.is_empty() {
            return Err(SubmitError::EmptyGoal);
        }

        let mut settings = self.settings.clone();
        if let Some(max) = request.max_iterations {
            if max == 0 {
                return Err(SubmitError::InvalidBudget("max_iterations must be at least 1".into()));
            }
            settings.max_iterations = max;
        }
        if let Some(max) = request.max_retries {
            if max == 0 {
                return Err(SubmitError::InvalidBudget("max_retries must be at least 1".into()));
            }
            settings.max_retries = max;
        }

        let tools = self.registry.select(&request.tool_names)?;
        let execution_id = ExecutionId::new();
        info!(execution_id = %execution_id, tools = tools.len(), "Run submitted");

        let mut reasoning = ReasoningLoop::new(self.provider.clone(), self.events.clone())
            .with_settings(settings)
            .with_parser(self.parser.clone());
        if let Some(evaluator) = &self.evaluator {
            reasoning = reasoning.with_evaluator(evaluator.clone());
        }

        Ok(reasoning.run(execution_id, goal, tools, cancel).await)
    }
}
