use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::llm::{LlmResponse, Message};
use crate::normalized::{NormalizedEvent, event_json, event_name};
use crate::pipeline::{AiConfig, ProviderFactory, ProviderPipeline, RequestContext, data_stream};
use crate::tools::{ToolManager, create_adapters};

/// Body returned when a non-streaming turn fails.
pub const ERROR_REPLY: &str = "Sorry, I encountered an error while processing your request.";

/// Start the Axum server with the provided state.
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// All routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for both chat endpoints.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<Message>,
    /// Provider and model override.
    #[serde(default)]
    config: AiConfig,
    /// Date, time, and location for the system preamble.
    #[serde(default)]
    context: RequestContext,
}

async fn health() -> &'static str {
    "ok"
}

/// A pipeline bound to a fresh tool manager for this request.
fn pipeline_for(
    state: &AppState,
    ai: &AiConfig,
) -> Result<ProviderPipeline, crate::error::FactoryError> {
    let adapters = create_adapters(&state.mcp, Arc::clone(&state.transport));
    let tools = Arc::new(ToolManager::new(adapters));
    ProviderFactory::create(ai, &state.config.llm, &state.config.pipeline, tools)
}

/// POST /api/chat - Complete assistant reply.
async fn api_chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    tracing::info!(
        message_count = req.messages.len(),
        provider = ?req.config.provider,
        "Received chat request"
    );

    let pipeline = match pipeline_for(&state, &req.config) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create provider");
            return error_reply();
        }
    };

    match pipeline.generate_response(req.messages, &req.context).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Chat request failed");
            error_reply()
        }
    }
}

fn error_reply() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(LlmResponse::assistant(ERROR_REPLY)),
    )
        .into_response()
}

/// POST /api/chat/stream - Two-phase SSE reply.
async fn api_chat_stream(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    tracing::info!(
        message_count = req.messages.len(),
        provider = ?req.config.provider,
        "Received streaming chat request"
    );

    let pipeline = match pipeline_for(&state, &req.config) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create provider");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let (writer, events) = data_stream();
    // On a start failure the error record is already in the stream.
    if let Err(e) = pipeline
        .generate_stream_response(req.messages, &req.context, writer)
        .await
    {
        tracing::error!(error = %e, "Failed to start streaming response");
    }

    build_sse_response(events).into_response()
}

fn build_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    S: Stream<Item = NormalizedEvent> + Send + 'static,
{
    let stream = stream.map(|event| {
        Ok(Event::default()
            .event(event_name(&event))
            .data(event_json(&event)))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::mcp::{McpConfig, RmcpTransport};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(provider: &str) -> AppState {
        let mut config = AppConfig::load_from_args(["waypoint"]).unwrap();
        config.llm.provider = provider.to_string();
        AppState::new(config, McpConfig::default(), Arc::new(RmcpTransport))
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_health() {
        let resp = router(state("openai"))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_chat_with_unknown_provider_answers_apology() {
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "config": {"provider": "teleporter"}
        });
        let resp = router(state("openai"))
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let reply: LlmResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reply, LlmResponse::assistant(ERROR_REPLY));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_stream_with_unknown_provider_is_bad_request() {
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": "Hi"}],
            "config": {"provider": "teleporter"}
        });
        let resp = router(state("openai"))
            .oneshot(
                Request::post("/api/chat/stream")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
