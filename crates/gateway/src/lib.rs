//! HTTP API gateway for semloop.
//!
//! Exposes the two external interfaces of the engine, run submission and
//! the live event stream, plus tool listing and a health check.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, extract::State, response::Json, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use semloop_agent::AgentRunner;
use semloop_core::error::{Error, ProviderError};
use semloop_core::event::EventBroadcaster;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub runner: Arc<AgentRunner>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(runner: Arc<AgentRunner>) -> Self {
        Self {
            runner,
            start_time: chrono::Utc::now(),
        }
    }
}

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// The provider, tool registry and event broadcaster are built once and
/// shared by every request. The configuration is validated before anything
/// binds.
pub async fn start(config: semloop_config::AppConfig) -> semloop_core::Result<()> {
    config.validate().map_err(|e| Error::Config {
        message: e.to_string(),
    })?;
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let router = semloop_providers::router::build_from_config(&config);
    let provider = router.default().ok_or_else(|| {
        ProviderError::NotConfigured(format!(
            "{}; set default_provider in config.toml",
            config.default_provider
        ))
    })?;
    let registry = Arc::new(semloop_tools::default_registry());
    let events = Arc::new(EventBroadcaster::new(
        config.events.capacity,
        config.events.history,
    ));
    let runner = Arc::new(AgentRunner::from_config(&config, provider, registry, events));

    let app = build_router(Arc::new(GatewayState::new(runner)));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: i64,
    pub subscribers: usize,
    pub tools: usize,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        subscribers: state.runner.events().subscriber_count(),
        tools: state.runner.registry().list().len(),
    })
}

#[cfg(test)]
pub(crate) fn test_state(replies: &[&str]) -> SharedState {
    let provider = Arc::new(tests::MockProvider::new(replies));
    let runner = AgentRunner::new(
        provider,
        Arc::new(semloop_tools::default_registry()),
        Arc::new(EventBroadcaster::default()),
    );
    Arc::new(GatewayState::new(Arc::new(runner)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use semloop_core::error::ProviderError;
    use semloop_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Lightweight scripted provider for gateway tests.
    pub(crate) struct MockProvider {
        replies: Mutex<VecDeque<String>>,
    }

    impl MockProvider {
        pub(crate) fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let content = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "Final Answer: out of script".into());
            Ok(ProviderResponse {
                content,
                usage: None,
                model: request.model,
            })
        }
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state(&[]));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.subscribers, 0);
        assert_eq!(health.tools, 7);
    }

    #[tokio::test]
    async fn v1_routes_are_nested() {
        let app = build_router(test_state(&[]));

        let req = Request::builder()
            .uri("/v1/tools")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_rejects_invalid_config_before_binding() {
        let mut config = semloop_config::AppConfig::default();
        config.agent.max_retries = 0;

        let err = start(config).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("max_retries"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(test_state(&[]));

        let req = Request::builder()
            .uri("/v1/conversations")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
