//! HTTP API v1: run submission and the live event stream.
//!
//! Endpoints:
//!
//! - `POST /v1/runs`   : Submit a run, wait for its outcome
//! - `GET  /v1/events` : SSE stream of run events (recent history first)
//! - `GET  /v1/tools`  : List addressable tools, multitools expanded

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use semloop_agent::{RunOutcome, RunRequest, SubmitError};
use semloop_core::event::RunEvent;

use crate::SharedState;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/runs", post(submit_run_handler))
        .route("/events", get(event_stream_handler))
        .route("/tools", get(list_tools_handler))
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolDto {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Parent tool for multitool sub-actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDto>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only forward events of this run.
    pub execution_id: Option<String>,
}

// ── Runs ──────────────────────────────────────────────────────────────────

/// `POST /v1/runs`: run a request to completion.
///
/// The run executes on its own task. If the client goes away first, the
/// run is cancelled and still publishes its terminal event.
async fn submit_run_handler(
    State(state): State<SharedState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunOutcome>, (StatusCode, Json<ErrorResponse>)> {
    info!(tools = request.tool_names.len(), "v1/runs request");

    let cancel = CancellationToken::new();
    let _cancel_on_disconnect = cancel.clone().drop_guard();
    let runner = Arc::clone(&state.runner);
    let task = tokio::spawn(async move { runner.submit_with_cancel(request, cancel).await });

    match task.await {
        Ok(Ok(outcome)) => Ok(Json(outcome)),
        Ok(Err(e)) => Err(submit_error(e)),
        Err(e) => {
            error!(error = %e, "Run task panicked");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "run aborted unexpectedly".into(),
                }),
            ))
        }
    }
}

fn submit_error(e: SubmitError) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ── SSE Event Stream ──────────────────────────────────────────────────────

/// `GET /v1/events`: SSE stream of run events.
///
/// The stream owns its subscription: when the client disconnects the
/// stream is dropped and the subscriber is removed.
async fn event_stream_handler(
    State(state): State<SharedState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut subscription = state.runner.events().subscribe();
    info!(subscriber = subscription.id(), "v1/events subscriber connected");

    let snapshot = stream::iter(subscription.take_snapshot());
    let live = stream::unfold(subscription, |mut subscription| async move {
        subscription.recv().await.map(|event| (event, subscription))
    });

    let stream = snapshot
        .chain(live)
        .filter(move |event| {
            let keep = filter
                .execution_id
                .as_ref()
                .is_none_or(|id| &event.execution_id.0 == id);
            async move { keep }
        })
        .map(|event| Ok(to_sse(&event)));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &RunEvent) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default()
        .event(event.kind.as_str())
        .id(format!("{}:{}", event.execution_id, event.sequence))
        .data(data)
}

// ── Tools ─────────────────────────────────────────────────────────────────

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolDto> = state
        .runner
        .registry()
        .list()
        .into_iter()
        .map(|d| ToolDto {
            parent: d.sub_action.is_some().then(|| d.tool_name.clone()),
            name: d.name,
            description: d.description,
            input_schema: d.input_schema,
        })
        .collect();

    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}
