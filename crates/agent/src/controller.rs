//! Reasoning loop controller: THINKING → ACTING → OBSERVING → THINKING.
//!
//! One [`ReasoningLoop::run`] call drives one execution to FINISHED or
//! FAILED. Within a run everything is sequential: every prompt depends on
//! the outcome of every earlier step. The model call and the tool call are
//! the only suspension points; both are individually time-bounded and
//! raced against the cancellation token.
//!
//! # Failure handling
//!
//! - Tool errors and tool timeouts become error observations.
//! - Retriable parse failures, schema mismatches and provider errors become
//!   synthetic observations and consume one retry. A successful tool
//!   dispatch resets the count.
//! - Everything else, and any exhausted budget, ends the run.

use chrono::Utc;
use semloop_config::AppConfig;
use semloop_core::error::{ProviderError, ToolError};
use semloop_core::event::{EventBroadcaster, EventKind, ExecutionId, RunEvent};
use semloop_core::message::Message;
use semloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use semloop_core::tool::ToolSet;
use semloop_parsers::{ActionParser, OutputParser, ParseResult};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::evaluation::{SelfEvaluator, Verdict};
use crate::prompt::{OBSERVATION_STOP, build_transcript};
use crate::resolver::{ActionRequest, ActionResolver};
use crate::state::{ExecutionState, FailureReason, LoopState, Observation, RunStatus, Step};

/// Budgets and generation parameters for a run.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// THINKING entries allowed per run.
    pub max_iterations: usize,
    /// Consecutive retriable failures allowed before the run fails.
    pub max_retries: usize,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    /// Absolute wall-clock budget for the whole run.
    pub run_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".into(),
            temperature: 0.2,
            max_tokens: Some(1024),
            max_iterations: 10,
            max_retries: 3,
            model_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(600),
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let model = config
            .providers
            .get(&config.default_provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| config.default_model.clone());

        Self {
            model,
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_iterations: config.agent.max_iterations,
            max_retries: config.agent.max_retries,
            model_timeout: config.agent.model_timeout(),
            tool_timeout: config.agent.tool_timeout(),
            run_timeout: config.agent.run_timeout(),
        }
    }
}

/// The terminal result of a run, with its full step history.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub execution_id: ExecutionId,
    #[serde(flatten)]
    pub status: RunStatus,
    pub steps: Vec<Step>,
    pub iterations: usize,
    pub usage: Usage,
}

impl RunOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Finished { .. })
    }

    pub fn answer(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Finished { answer } => Some(answer),
            RunStatus::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            RunStatus::Failed { reason } => Some(reason),
            RunStatus::Finished { .. } => None,
        }
    }
}

/// What the parsed model output asks the loop to do next.
enum Decision {
    Answer(String),
    Act(ActionRequest),
    Retry(String),
}

/// Drives executions through the reasoning state machine.
pub struct ReasoningLoop {
    provider: Arc<dyn Provider>,
    parser: Arc<dyn OutputParser>,
    events: Arc<EventBroadcaster>,
    evaluator: Option<Arc<dyn SelfEvaluator>>,
    settings: LoopSettings,
}

impl ReasoningLoop {
    pub fn new(provider: Arc<dyn Provider>, events: Arc<EventBroadcaster>) -> Self {
        Self {
            provider,
            parser: Arc::new(ActionParser::default()),
            events,
            evaluator: None,
            settings: LoopSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the action parser (e.g. one that accepts bare prose as final).
    pub fn with_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Review every final answer before accepting it.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn SelfEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.settings.max_iterations = max;
        self
    }

    pub fn with_max_retries(mut self, max: usize) -> Self {
        self.settings.max_retries = max;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run one execution to completion. Always resolves, at the latest when
    /// the wall-clock budget runs out.
    pub async fn run(
        &self,
        execution_id: ExecutionId,
        goal: &str,
        tools: ToolSet,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let mut state = ExecutionState::new(execution_id, goal, tools);
        info!(
            execution_id = %state.execution_id,
            model = %self.settings.model,
            tools = state.tools.len(),
            max_iterations = self.settings.max_iterations,
            "Reasoning loop starting"
        );

        let budget = self.settings.run_timeout;
        let result = match tokio::time::timeout(budget, self.drive(&mut state, &cancel)).await {
            Ok(result) => result,
            Err(_) => Err(FailureReason::WallClockExceeded {
                budget_secs: budget.as_secs(),
            }),
        };
        self.conclude(state, result)
    }

    async fn drive(
        &self,
        state: &mut ExecutionState,
        cancel: &CancellationToken,
    ) -> Result<String, FailureReason> {
        loop {
            if cancel.is_cancelled() {
                return Err(FailureReason::Cancelled);
            }
            if state.iterations >= self.settings.max_iterations {
                return Err(FailureReason::IterationBudgetExceeded {
                    max_iterations: self.settings.max_iterations,
                });
            }

            // --- THINKING ---
            state.iterations += 1;
            state.state = LoopState::Thinking;
            let prompt = build_transcript(&state.goal, &state.tools, &state.steps);
            let mut step = Step::new(state.steps.len(), prompt.clone());
            debug!(execution_id = %state.execution_id, step = step.index, "Thinking");

            let response = match self.call_model(prompt, cancel).await? {
                Ok(response) => response,
                Err(e) if e.is_retriable() => {
                    self.retry(state, step, format!("The model call failed ({e}). Continue."))?;
                    continue;
                }
                Err(e) => {
                    close(state, step);
                    return Err(FailureReason::Provider {
                        message: e.to_string(),
                    });
                }
            };

            if let Some(usage) = &response.usage {
                state.usage.add(usage);
            }
            let raw = response.content;
            self.emit(state, EventKind::Thought, json!({ "step": step.index, "content": raw }));
            let parsed = self.parser.parse(&raw);
            step.raw_output = Some(raw);
            step.parse_result = Some(parsed.clone());

            let decision = match parsed {
                ParseResult::Final { content } => Decision::Answer(content),
                ParseResult::Value { value, .. } => Decision::Answer(match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
                ParseResult::Failure(failure) if failure.retriable => Decision::Retry(format!(
                    "Your reply could not be used: {}. Reply with an Action and Action Input, \
                     or with a Final Answer.",
                    failure.reason
                )),
                ParseResult::Failure(failure) => {
                    close(state, step);
                    return Err(FailureReason::Parse {
                        message: failure.reason,
                    });
                }
                ParseResult::Action { name, raw_input } => {
                    match ActionResolver::resolve(&state.tools, &name, raw_input.as_deref()) {
                        Ok(request) => Decision::Act(request),
                        Err(e) if e.is_retriable() => Decision::Retry(format!(
                            "{e}. Correct the Action Input to match the input schema."
                        )),
                        Err(e) => {
                            close(state, step);
                            return Err(FailureReason::Resolution {
                                message: e.to_string(),
                            });
                        }
                    }
                }
            };

            match decision {
                Decision::Answer(answer) => match self.review(state, &answer, cancel).await? {
                    Verdict::Accept => {
                        close(state, step);
                        return Ok(answer);
                    }
                    Verdict::Revise(critique) => {
                        info!(execution_id = %state.execution_id, step = step.index, "Answer sent back for revision");
                        let observation = Observation::revision(format!(
                            "Your answer was reviewed and needs revision: {critique}"
                        ));
                        self.observe(state, step, observation);
                    }
                },
                Decision::Retry(message) => self.retry(state, step, message)?,
                Decision::Act(request) => {
                    // --- ACTING ---
                    state.state = LoopState::Acting;
                    self.emit(
                        state,
                        EventKind::Action,
                        json!({ "step": step.index, "tool": request.tool_name(), "args": request.args() }),
                    );
                    let observation = self.act(state, &request, step.index, cancel).await;
                    step.action = Some(request);
                    let observation = match observation {
                        Ok(observation) => observation,
                        Err(reason) => {
                            close(state, step);
                            return Err(reason);
                        }
                    };

                    // --- OBSERVING ---
                    state.state = LoopState::Observing;
                    state.consecutive_retries = 0;
                    self.observe(state, step, observation);
                }
            }
        }
    }

    /// Invoke the model. The outer `Err` means the run was cancelled; a
    /// timeout is reported as a retriable provider error.
    async fn call_model(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<Result<ProviderResponse, ProviderError>, FailureReason> {
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stop: vec![OBSERVATION_STOP.to_string()],
        };
        let timeout = self.settings.model_timeout;

        tokio::select! {
            _ = cancel.cancelled() => Err(FailureReason::Cancelled),
            result = tokio::time::timeout(timeout, self.provider.complete(request)) => Ok(match result {
                Ok(response) => response,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "no reply within {}s",
                    timeout.as_secs()
                ))),
            }),
        }
    }

    /// Dispatch a resolved action. Only cancellation is an `Err`; tool
    /// failures come back as error observations.
    async fn act(
        &self,
        state: &ExecutionState,
        request: &ActionRequest,
        step: usize,
        cancel: &CancellationToken,
    ) -> Result<Observation, FailureReason> {
        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }

        let call_id = format!("{}-{step}", state.execution_id);
        let timeout = self.settings.tool_timeout;
        info!(execution_id = %state.execution_id, step, tool = request.tool_name(), "Dispatching action");

        tokio::select! {
            _ = cancel.cancelled() => Err(FailureReason::Cancelled),
            result = tokio::time::timeout(timeout, request.dispatch(&call_id)) => Ok(match result {
                Ok(Ok(result)) => Observation::from_tool(result),
                Ok(Err(e)) => {
                    warn!(execution_id = %state.execution_id, step, tool = request.tool_name(), error = %e, "Tool failed");
                    Observation::tool_error(e.to_string())
                }
                Err(_) => {
                    let e = ToolError::Timeout {
                        tool_name: request.tool_name().to_string(),
                        timeout_secs: timeout.as_secs(),
                    };
                    warn!(execution_id = %state.execution_id, step, error = %e, "Tool timed out");
                    Observation::tool_error(e.to_string())
                }
            }),
        }
    }

    async fn review(
        &self,
        state: &ExecutionState,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<Verdict, FailureReason> {
        let Some(evaluator) = &self.evaluator else {
            return Ok(Verdict::Accept);
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(FailureReason::Cancelled),
            verdict = evaluator.evaluate(&state.goal, answer, &state.steps) => Ok(verdict),
        }
    }

    /// Record a retriable failure as a synthetic observation and consume a retry.
    fn retry(
        &self,
        state: &mut ExecutionState,
        step: Step,
        message: String,
    ) -> Result<(), FailureReason> {
        state.consecutive_retries += 1;
        warn!(
            execution_id = %state.execution_id,
            step = step.index,
            retries = state.consecutive_retries,
            reason = %message,
            "Retriable failure"
        );
        self.observe(state, step, Observation::synthetic(message.clone()));

        if state.consecutive_retries >= self.settings.max_retries {
            return Err(FailureReason::RetryBudgetExceeded {
                max_retries: self.settings.max_retries,
                last_error: message,
            });
        }
        Ok(())
    }

    /// Append the observation to the step, publish it and close the step.
    fn observe(&self, state: &mut ExecutionState, mut step: Step, observation: Observation) {
        self.emit(
            state,
            EventKind::Observation,
            json!({
                "step": step.index,
                "content": observation.content,
                "is_error": observation.is_error,
                "synthetic": observation.synthetic,
            }),
        );
        step.observation = Some(observation);
        close(state, step);
    }

    fn emit(&self, state: &mut ExecutionState, kind: EventKind, payload: serde_json::Value) {
        let sequence = state.next_sequence();
        self.events.publish(RunEvent::new(
            state.execution_id.clone(),
            sequence,
            kind,
            payload,
        ));
    }

    fn conclude(
        &self,
        mut state: ExecutionState,
        result: Result<String, FailureReason>,
    ) -> RunOutcome {
        let status = match result {
            Ok(answer) => {
                state.state = LoopState::Finished;
                info!(execution_id = %state.execution_id, steps = state.steps.len(), "Run finished");
                let steps = state.steps.len();
                self.emit(&mut state, EventKind::Finish, json!({ "answer": answer, "steps": steps }));
                RunStatus::Finished { answer }
            }
            Err(reason) => {
                state.state = LoopState::Failed;
                warn!(execution_id = %state.execution_id, steps = state.steps.len(), reason = %reason, "Run failed");
                self.emit(
                    &mut state,
                    EventKind::Error,
                    json!({ "reason": reason.to_string(), "failure": reason }),
                );
                RunStatus::Failed { reason }
            }
        };

        RunOutcome {
            execution_id: state.execution_id,
            status,
            steps: state.steps,
            iterations: state.iterations,
            usage: state.usage,
        }
    }
}

fn close(state: &mut ExecutionState, mut step: Step) {
    step.finished_at = Some(Utc::now());
    state.steps.push(step);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, test_registry};
    use async_trait::async_trait;
    use semloop_core::error::ProviderError;
    use semloop_core::event::Subscription;
    use semloop_parsers::{JsonParser, ParseFailure};
    use std::sync::Mutex;

    fn tools(names: &[&str]) -> ToolSet {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        test_registry().select(&names).unwrap()
    }

    fn reasoning_loop(provider: &Arc<ScriptedProvider>, events: &Arc<EventBroadcaster>) -> ReasoningLoop {
        ReasoningLoop::new(provider.clone(), events.clone())
    }

    async fn run(reasoning: &ReasoningLoop, goal: &str, tools: ToolSet) -> RunOutcome {
        reasoning
            .run(ExecutionId::new(), goal, tools, CancellationToken::new())
            .await
    }

    fn drain(subscription: &mut Subscription) -> Vec<Arc<RunEvent>> {
        std::iter::from_fn(|| subscription.try_recv()).collect()
    }

    #[tokio::test]
    async fn one_step_finish() {
        let provider = Arc::new(ScriptedProvider::replies(&["Thought: easy.\nFinal Answer: 4"]));
        let events = Arc::new(EventBroadcaster::default());
        let mut subscription = events.subscribe();

        let outcome = run(&reasoning_loop(&provider, &events), "What is 2+2?", tools(&[])).await;

        assert_eq!(outcome.answer(), Some("4"));
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.usage.total_tokens, 15);
        assert_eq!(provider.call_count(), 1);

        let kinds: Vec<EventKind> = drain(&mut subscription).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Thought, EventKind::Finish]);
    }

    #[tokio::test]
    async fn tool_step_then_answer() {
        let provider = Arc::new(ScriptedProvider::replies(&[
            "Thought: compute it.\nAction: math__evaluate\nAction Input: {\"expression\": \"6 * 7\"}",
            "Final Answer: 42",
        ]));
        let events = Arc::new(EventBroadcaster::default());
        let mut subscription = events.subscribe();

        let outcome = run(&reasoning_loop(&provider, &events), "6 times 7?", tools(&["math"])).await;

        assert_eq!(outcome.answer(), Some("42"));
        assert_eq!(outcome.steps.len(), 2);
        let first = &outcome.steps[0];
        assert_eq!(first.action.as_ref().unwrap().tool_name(), "math__evaluate");
        let observation = first.observation.as_ref().unwrap();
        assert_eq!(observation.content, "42");
        assert!(!observation.is_error);

        let prompts = provider.prompts();
        assert_eq!(prompts[1].last().unwrap().content, "Observation: 42");

        let events = drain(&mut subscription);
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Thought,
                EventKind::Action,
                EventKind::Observation,
                EventKind::Thought,
                EventKind::Finish
            ]
        );
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(events[1].payload["args"]["expression"], "6 * 7");
    }

    #[tokio::test]
    async fn always_ambiguous_fails_after_max_retries() {
        let provider = Arc::new(ScriptedProvider::always("Hmm, let me think about it."));
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events).with_max_retries(3);

        let outcome = run(&reasoning, "goal", tools(&[])).await;

        match outcome.failure() {
            Some(FailureReason::RetryBudgetExceeded { max_retries, .. }) => assert_eq!(*max_retries, 3),
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(provider.call_count(), 3);
        assert!(outcome.steps.iter().all(|s| s.observation.as_ref().unwrap().synthetic));
    }

    #[tokio::test]
    async fn tool_error_becomes_observation() {
        let provider = Arc::new(ScriptedProvider::replies(&[
            "Action: broken\nAction Input: {}",
            "Final Answer: the tool is broken",
        ]));
        let events = Arc::new(EventBroadcaster::default());

        let outcome = run(&reasoning_loop(&provider, &events), "goal", tools(&["broken"])).await;

        assert!(outcome.is_finished());
        let observation = outcome.steps[0].observation.as_ref().unwrap();
        assert!(observation.is_error);
        assert!(!observation.synthetic);
        assert!(observation.content.contains("disk on fire"));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_timeout_becomes_observation() {
        let provider = Arc::new(ScriptedProvider::replies(&["Action: slow", "Final Answer: gave up"]));
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events).with_settings(LoopSettings {
            tool_timeout: Duration::from_secs(1),
            ..LoopSettings::default()
        });

        let outcome = run(&reasoning, "goal", tools(&["slow"])).await;

        assert_eq!(outcome.answer(), Some("gave up"));
        let observation = outcome.steps[0].observation.as_ref().unwrap();
        assert!(observation.is_error);
        assert_eq!(observation.content, "Tool timed out: slow after 1s");
    }

    #[tokio::test]
    async fn schema_mismatch_is_fed_back() {
        let provider = Arc::new(ScriptedProvider::replies(&[
            "Action: math__round\nAction Input: {\"digits\": 2}",
            "Action: math__round\nAction Input: {\"value\": 3.14159, \"digits\": 2}",
            "Final Answer: 3.14",
        ]));
        let events = Arc::new(EventBroadcaster::default());

        let outcome = run(&reasoning_loop(&provider, &events), "round pi", tools(&["math"])).await;

        assert_eq!(outcome.answer(), Some("3.14"));
        assert_eq!(outcome.steps.len(), 3);
        let corrective = outcome.steps[0].observation.as_ref().unwrap();
        assert!(corrective.synthetic);
        assert!(corrective.content.contains("value"), "{}", corrective.content);
        assert!(outcome.steps[0].action.is_none());
        assert_eq!(outcome.steps[1].observation.as_ref().unwrap().content, "3.14");

        let second_prompt = &provider.prompts()[1];
        assert!(second_prompt.last().unwrap().content.starts_with("Observation: Invalid input"));
    }

    #[tokio::test]
    async fn successful_dispatch_resets_retries() {
        let provider = Arc::new(ScriptedProvider::replies(&[
            "no marker",
            "Action: clock",
            "no marker",
            "Final Answer: done",
        ]));
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events).with_max_retries(2);

        let outcome = run(&reasoning, "goal", tools(&["clock"])).await;

        assert_eq!(outcome.answer(), Some("done"));
        assert_eq!(outcome.steps.len(), 4);
    }

    #[tokio::test]
    async fn unknown_action_is_fatal() {
        let provider = Arc::new(ScriptedProvider::replies(&["Action: search\nAction Input: cats"]));
        let events = Arc::new(EventBroadcaster::default());
        let mut subscription = events.subscribe();

        let outcome = run(&reasoning_loop(&provider, &events), "goal", tools(&["math"])).await;

        match outcome.failure() {
            Some(FailureReason::Resolution { message }) => assert!(message.contains("search")),
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(outcome.steps.len(), 1);
        let last = drain(&mut subscription).pop().unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert_eq!(last.payload["failure"]["kind"], "resolution");
        assert!(last.payload["reason"].as_str().unwrap().contains("search"));
    }

    #[tokio::test]
    async fn action_and_final_together_is_retried() {
        let provider = Arc::new(ScriptedProvider::replies(&[
            "Action: clock\nFinal Answer: now",
            "Final Answer: now",
        ]));
        let events = Arc::new(EventBroadcaster::default());

        let outcome = run(&reasoning_loop(&provider, &events), "goal", tools(&["clock"])).await;

        assert_eq!(outcome.answer(), Some("now"));
        assert!(outcome.steps[0].observation.as_ref().unwrap().synthetic);
    }

    #[tokio::test]
    async fn iteration_budget() {
        let provider = Arc::new(ScriptedProvider::always("Action: clock"));
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events).with_max_iterations(2);

        let outcome = run(&reasoning, "goal", tools(&["clock"])).await;

        assert_eq!(
            outcome.failure(),
            Some(&FailureReason::IterationBudgetExceeded { max_iterations: 2 })
        );
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn retriable_provider_error_is_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited { retry_after_secs: 1 }),
            Ok("Final Answer: ok".into()),
        ]));
        let events = Arc::new(EventBroadcaster::default());

        let outcome = run(&reasoning_loop(&provider, &events), "goal", tools(&[])).await;

        assert_eq!(outcome.answer(), Some("ok"));
        assert!(outcome.steps[0].raw_output.is_none());
        // The failed call leaves no trace in the next prompt.
        assert_eq!(provider.prompts()[1].len(), 2);
    }

    #[tokio::test]
    async fn fatal_provider_error_fails_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let events = Arc::new(EventBroadcaster::default());

        let outcome = run(&reasoning_loop(&provider, &events), "goal", tools(&[])).await;

        match outcome.failure() {
            Some(FailureReason::Provider { message }) => assert!(message.contains("bad key")),
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn model_timeout_consumes_a_retry() {
        let provider = Arc::new(
            ScriptedProvider::always("Final Answer: too late").with_delay(Duration::from_secs(10)),
        );
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events).with_settings(LoopSettings {
            model_timeout: Duration::from_secs(1),
            max_retries: 2,
            ..LoopSettings::default()
        });

        let outcome = run(&reasoning, "goal", tools(&[])).await;

        match outcome.failure() {
            Some(FailureReason::RetryBudgetExceeded { last_error, .. }) => {
                assert!(last_error.contains("timed out"), "{last_error}")
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(outcome.steps.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_budget_forces_failure() {
        let provider = Arc::new(ScriptedProvider::always("Action: slow"));
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events).with_settings(LoopSettings {
            tool_timeout: Duration::from_secs(7200),
            run_timeout: Duration::from_secs(5),
            ..LoopSettings::default()
        });

        let outcome = run(&reasoning, "goal", tools(&["slow"])).await;

        assert_eq!(
            outcome.failure(),
            Some(&FailureReason::WallClockExceeded { budget_secs: 5 })
        );
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let provider = Arc::new(ScriptedProvider::always("Final Answer: x"));
        let events = Arc::new(EventBroadcaster::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = reasoning_loop(&provider, &events)
            .run(ExecutionId::new(), "goal", tools(&[]), cancel)
            .await;

        assert_eq!(outcome.failure(), Some(&FailureReason::Cancelled));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_model_call() {
        let provider = Arc::new(
            ScriptedProvider::always("Final Answer: x").with_delay(Duration::from_secs(60)),
        );
        let events = Arc::new(EventBroadcaster::default());
        let mut subscription = events.subscribe();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcome = reasoning_loop(&provider, &events)
            .run(ExecutionId::new(), "goal", tools(&[]), cancel)
            .await;

        assert_eq!(outcome.failure(), Some(&FailureReason::Cancelled));
        let events = drain(&mut subscription);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
        assert_eq!(events[0].payload["reason"], "cancelled");
    }

    struct ReviseOnce {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SelfEvaluator for ReviseOnce {
        async fn evaluate(&self, _goal: &str, _answer: &str, _steps: &[Step]) -> Verdict {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Verdict::Revise("Include the unit.".into())
            } else {
                Verdict::Accept
            }
        }
    }

    #[tokio::test]
    async fn self_evaluation_sends_answer_back() {
        let provider = Arc::new(ScriptedProvider::replies(&[
            "Final Answer: 4",
            "Final Answer: 4 apples",
        ]));
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events)
            .with_max_retries(1)
            .with_evaluator(Arc::new(ReviseOnce {
                calls: Mutex::new(0),
            }));

        let outcome = run(&reasoning, "How many apples?", tools(&[])).await;

        assert_eq!(outcome.answer(), Some("4 apples"));
        assert_eq!(outcome.iterations, 2);
        let critique = outcome.steps[0].observation.as_ref().unwrap();
        assert!(critique.synthetic);
        assert!(!critique.is_error);
        assert!(critique.content.contains("Include the unit."));
    }

    struct Refusing;

    impl OutputParser for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        fn parse(&self, text: &str) -> ParseResult {
            ParseResult::Failure(ParseFailure::fatal("model refused", text))
        }
    }

    #[tokio::test]
    async fn fatal_parse_failure_ends_run() {
        let provider = Arc::new(ScriptedProvider::always("I won't do that."));
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events).with_parser(Arc::new(Refusing));

        let outcome = run(&reasoning, "goal", tools(&[])).await;

        assert_eq!(
            outcome.failure(),
            Some(&FailureReason::Parse {
                message: "model refused".into()
            })
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn value_parser_result_is_the_answer() {
        let provider = Arc::new(ScriptedProvider::replies(&["```json\n{\"total\": 3}\n```"]));
        let events = Arc::new(EventBroadcaster::default());
        let reasoning = reasoning_loop(&provider, &events).with_parser(Arc::new(JsonParser));

        let outcome = run(&reasoning, "goal", tools(&[])).await;

        assert_eq!(outcome.answer(), Some(r#"{"total":3}"#));
    }

    #[tokio::test]
    async fn concurrent_runs_are_isolated() {
        let events = Arc::new(EventBroadcaster::new(256, 0));
        let mut subscription = events.subscribe();
        let registry = Arc::new(test_registry());

        let first_provider = Arc::new(ScriptedProvider::replies(&[
            "Action: text__upper\nAction Input: alpha",
            "Final Answer: ALPHA",
        ]));
        let second_provider = Arc::new(ScriptedProvider::replies(&[
            "Action: text__lower\nAction Input: BETA",
            "Final Answer: beta",
        ]));
        let first = reasoning_loop(&first_provider, &events);
        let second = reasoning_loop(&second_provider, &events);
        let first_id = ExecutionId::new();
        let second_id = ExecutionId::new();

        let (a, b) = tokio::join!(
            first.run(first_id.clone(), "shout alpha", registry.select(&["text".into()]).unwrap(), CancellationToken::new()),
            second.run(second_id.clone(), "whisper BETA", registry.select(&["text".into()]).unwrap(), CancellationToken::new()),
        );

        assert_eq!(a.answer(), Some("ALPHA"));
        assert_eq!(b.answer(), Some("beta"));
        for prompt in first_provider.prompts() {
            assert!(prompt.iter().all(|m| !m.content.contains("BETA")));
        }
        for prompt in second_provider.prompts() {
            assert!(prompt.iter().all(|m| !m.content.contains("alpha")));
        }

        let received = drain(&mut subscription);
        assert_eq!(received.len(), 10);
        for id in [&first_id, &second_id] {
            let sequences: Vec<u64> = received
                .iter()
                .filter(|e| &e.execution_id == id)
                .map(|e| e.sequence)
                .collect();
            assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        }
    }
}
