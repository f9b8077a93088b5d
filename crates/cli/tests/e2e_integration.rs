//! End-to-end integration tests for the semloop reasoning-loop engine.
//!
//! These tests exercise the full pipeline from run submission to final
//! answer: prompt assembly, output parsing with repair, action resolution
//! against the built-in tools, event fan-out and the HTTP gateway.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use semloop_agent::{AgentRunner, FailureReason, RunRequest};
use semloop_core::error::ProviderError;
use semloop_core::event::{EventBroadcaster, EventKind};
use semloop_core::message::Message;
use semloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use semloop_gateway::{GatewayState, build_router};
use semloop_parsers::{ActionParser, NoMarkerPolicy, OutputParser, ParseResult, ParserSet};
use semloop_tools::default_registry;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn last_prompt(&self) -> Vec<Message> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.prompts.lock().unwrap().push(request.messages);
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider exhausted");
        Ok(ProviderResponse {
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

fn runner(provider: Arc<ScriptedProvider>) -> AgentRunner {
    AgentRunner::new(
        provider,
        Arc::new(default_registry()),
        Arc::new(EventBroadcaster::default()),
    )
}

// ── Reasoning loop ───────────────────────────────────────────────────────

#[tokio::test]
async fn multi_tool_run_reaches_final_answer() {
    let provider = ScriptedProvider::new(&[
        "Thought: first the arithmetic.\nAction: math__evaluate\nAction Input: {\"expression\": \"(17 + 4) * 2\"}",
        "Thought: now shout it.\nAction: text__upper\nAction Input: \"forty-two\"",
        "Thought: done.\nFinal Answer: 42 (FORTY-TWO)",
    ]);
    let runner = runner(provider.clone());

    let outcome = runner
        .submit(RunRequest::new("Compute (17+4)*2 and spell it loudly").with_tools(&["math", "text"]))
        .await
        .unwrap();

    assert_eq!(outcome.answer(), Some("42 (FORTY-TWO)"));
    assert_eq!(outcome.steps.len(), 3);
    assert_eq!(outcome.usage.total_tokens, 45);
    assert_eq!(provider.calls(), 3);

    let observations: Vec<&str> = outcome
        .steps
        .iter()
        .filter_map(|s| s.observation.as_ref())
        .map(|o| o.content.as_str())
        .collect();
    assert_eq!(observations, vec!["42", "FORTY-TWO"]);

    // Every prior output and observation is replayed to the model.
    let last = provider.last_prompt();
    assert_eq!(last.len(), 6);
    assert_eq!(last[3].content, "Observation: 42");
    assert_eq!(last[5].content, "Observation: FORTY-TWO");
}

#[tokio::test]
async fn malformed_action_input_is_repaired() {
    let provider = ScriptedProvider::new(&[
        "Action: math__round\nAction Input: {\"value\": 2.71828, \"digits\": 3",
        "Final Answer: 2.718",
    ]);
    let outcome = runner(provider)
        .submit(RunRequest::new("Round e to 3 digits").with_tools(&["math__round"]))
        .await
        .unwrap();

    assert_eq!(outcome.answer(), Some("2.718"));
    let first = &outcome.steps[0];
    assert_eq!(first.action.as_ref().unwrap().args()["digits"], 3);
    assert_eq!(first.observation.as_ref().unwrap().content, "2.718");
}

#[tokio::test]
async fn tool_failure_is_recoverable() {
    let provider = ScriptedProvider::new(&[
        "Action: math__evaluate\nAction Input: 1 / 0",
        "Action: math__evaluate\nAction Input: 1 / 4",
        "Final Answer: 0.25",
    ]);
    let outcome = runner(provider)
        .submit(RunRequest::new("Divide").with_tools(&["math"]))
        .await
        .unwrap();

    assert_eq!(outcome.answer(), Some("0.25"));
    let failed = outcome.steps[0].observation.as_ref().unwrap();
    assert!(failed.is_error);
    assert!(failed.content.contains("division by zero"));
}

#[tokio::test]
async fn ambiguous_model_exhausts_retries() {
    let provider = ScriptedProvider::new(&["I could check.", "Maybe later.", "Hmm."]);
    let mut request = RunRequest::new("Anything");
    request.max_retries = Some(3);

    let outcome = runner(provider.clone()).submit(request).await.unwrap();

    assert!(matches!(
        outcome.failure(),
        Some(FailureReason::RetryBudgetExceeded { max_retries: 3, .. })
    ));
    assert_eq!(provider.calls(), 3);
    assert_eq!(outcome.steps.len(), 3);
}

#[tokio::test]
async fn run_events_arrive_in_order() {
    let provider = ScriptedProvider::new(&["Action: clock", "Final Answer: it is late"]);
    let runner = runner(provider);
    let mut subscription = runner.events().subscribe();

    let outcome = runner
        .submit(RunRequest::new("What time is it?").with_tools(&["clock"]))
        .await
        .unwrap();

    let events: Vec<_> = std::iter::from_fn(|| subscription.try_recv()).collect();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Thought,
            EventKind::Action,
            EventKind::Observation,
            EventKind::Thought,
            EventKind::Finish,
        ]
    );
    assert!(events.iter().all(|e| e.execution_id == outcome.execution_id));
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert_eq!(events[4].payload["answer"], "it is late");
}

#[tokio::test]
async fn cancelled_submission_fails_cleanly() {
    let provider = ScriptedProvider::new(&[]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = runner(provider.clone())
        .submit_with_cancel(RunRequest::new("never runs"), cancel)
        .await
        .unwrap();

    assert_eq!(outcome.failure(), Some(&FailureReason::Cancelled));
    assert_eq!(provider.calls(), 0);
}

// ── Parsers ──────────────────────────────────────────────────────────────

#[test]
fn parser_set_handles_chain_of_thought_outputs() {
    let set = ParserSet::standard();

    let result = set
        .get("json")
        .unwrap()
        .parse("Here you go:\n```json\n{\"ok\": True, \"note\": \"True story\"\n```");
    match result {
        ParseResult::Value { value, repaired, context } => {
            assert_eq!(value, serde_json::json!({"ok": true, "note": "True story"}));
            assert!(repaired);
            assert_eq!(context.as_deref(), Some("Here you go:"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let result = set
        .get("numbered_list")
        .unwrap()
        .parse("Let me think.\n1. alpha\n2. beta\nThat is all.");
    assert_eq!(result, ParseResult::value(serde_json::json!(["alpha", "beta"])));
}

#[test]
fn action_parser_policy_is_explicit() {
    let strict = ActionParser::new(NoMarkerPolicy::Retry);
    let lenient = ActionParser::new(NoMarkerPolicy::AcceptAsFinal);

    assert!(strict.parse("Just prose.").is_failure());
    assert_eq!(
        lenient.parse("Just prose."),
        ParseResult::Final {
            content: "Just prose.".into()
        }
    );
}

// ── Gateway ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn gateway_runs_and_reports_health() {
    let provider = ScriptedProvider::new(&[
        "Action: text__word_count\nAction Input: {\"text\": \"one two three\"}",
        "Final Answer: 3",
    ]);
    let state = Arc::new(GatewayState::new(Arc::new(runner(provider))));

    let response = build_router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/runs")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"goal": "Count the words", "toolNames": ["text"]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "finished");
    assert_eq!(json["answer"], "3");
    assert_eq!(json["steps"][0]["observation"]["data"]["words"], 3);

    let response = build_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
