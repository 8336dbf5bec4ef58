//! REST API server for the investment insight orchestrator
//!
//! Blocking and streaming chat, session management and cache reset over
//! HTTP. A blank message is a 400 and a session store failure a 503;
//! degraded answers are ordinary 200 responses carrying `"degraded": true`.

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::OrchestrationError;
use crate::models::ChatRequest;
use crate::orchestrator::Orchestrator;
use crate::stream::StreamEvent;

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn unavailable(error: impl std::fmt::Display) -> ApiResult {
    (StatusCode::SERVICE_UNAVAILABLE, Json(ApiResponse::error(error.to_string())))
}

fn failure(error: OrchestrationError) -> ApiResult {
    match error {
        OrchestrationError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, Json(ApiResponse::error(error.to_string()))),
        other => unavailable(other),
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoints
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    match state.orchestrator.process(req).await {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::success(response))),
        Err(e) => {
            warn!(error = %e, "Chat request failed");
            failure(e)
        }
    }
}

async fn chat_stream_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> Response {
    if let Err(e) = req.validate() {
        return failure(e).into_response();
    }
    info!(session_id = req.session_id.as_deref().unwrap_or("-"), "Streaming chat request");
    let rx = state.orchestrator.stream(req);

    Sse::new(sse_events(rx)).keep_alive(KeepAlive::default()).into_response()
}

// Dropping the body drops the receiver, which cancels the turn.
fn sse_events(rx: mpsc::Receiver<StreamEvent>) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
        .map(|event| Event::default().event(event.event_name()).json_data(&event))
}

async fn clear_session_handler(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    match state.orchestrator.clear_session(&session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "session_id": session_id, "cleared": true }))),
        ),
        Err(e) => unavailable(e),
    }
}

async fn history_handler(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    match state.orchestrator.history(&session_id).await {
        Ok(messages) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "messages": messages,
            }))),
        ),
        Err(e) => unavailable(e),
    }
}

async fn reset_handler(State(state): State<ApiState>, body: Option<Json<ResetRequest>>) -> ApiResult {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    state.orchestrator.reset(req.session_id.as_deref()).await;
    (StatusCode::OK, Json(ApiResponse::success(serde_json::json!({ "reset": true }))))
}

/// =============================
/// Router
/// =============================

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
}

pub fn create_router(orchestrator: Arc<Orchestrator>, cors_origins: &[String]) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/chat/stream", post(chat_stream_handler))
        .route("/api/v1/chat/session/:session_id", delete(clear_session_handler))
        .route("/api/v1/chat/session/:session_id/history", get(history_handler))
        .route("/api/v1/reset", post(reset_handler))
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
    cors_origins: &[String],
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, cors_origins);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingStore, OrchestratorBuilder};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(orchestrator: Arc<Orchestrator>) -> Router {
        create_router(orchestrator, &[])
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(OrchestratorBuilder::new().build())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_chat_then_history() {
        let orchestrator = OrchestratorBuilder::new().build();

        let response = app(orchestrator.clone())
            .oneshot(post_json("/api/v1/chat", json!({"message": "What is NAV?", "session_id": "s1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["session_id"], "s1");
        assert_eq!(body["data"]["cached"], false);
        assert_eq!(body["data"]["degraded"], false);
        assert!(body["data"]["response"]["risk_disclaimer"].as_str().is_some_and(|d| !d.is_empty()));

        let response = app(orchestrator)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/chat/session/s1/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        let messages = body["data"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "agent");
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected_by_both_chat_routes() {
        let orchestrator = OrchestratorBuilder::new().build();
        for uri in ["/api/v1/chat", "/api/v1/chat/stream"] {
            let response = app(orchestrator.clone())
                .oneshot(post_json(uri, json!({"message": "   ", "session_id": "s1"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body_json(response).await["success"], false);
        }
        assert!(orchestrator.history("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_service_unavailable() {
        let orchestrator = OrchestratorBuilder::new().sessions(Arc::new(FailingStore)).build();
        let response = app(orchestrator)
            .oneshot(post_json("/api/v1/chat", json!({"message": "What is NAV?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_stream_emits_sse_events() {
        let response = app(OrchestratorBuilder::new().build())
            .oneshot(post_json("/api/v1/chat/stream", json!({"message": "What is NAV?"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: token"));
        assert!(text.contains("event: complete"));
        assert!(!text.contains("event: error"));
    }

    #[tokio::test]
    async fn test_reset_and_clear_session() {
        let orchestrator = OrchestratorBuilder::new().build();
        orchestrator
            .process(ChatRequest::new("What is NAV?").with_session("s1"))
            .await
            .unwrap();

        let response = app(orchestrator.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/chat/session/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(orchestrator.history("s1").await.unwrap().is_empty());

        let response = app(orchestrator.clone())
            .oneshot(Request::builder().method("POST").uri("/api/v1/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(orchestrator)
            .oneshot(post_json("/api/v1/reset", json!({"session_id": "s1"})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["data"]["reset"], true);
    }
}
