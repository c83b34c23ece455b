//! HTTP surface
//!
//! Thin axum layer over the orchestrator: JSON request bodies in,
//! JSON (or NDJSON for the streamed endpoints) out. Handlers never touch
//! session state directly; everything mutating goes through
//! [`TurnOrchestrator`] so the per-session locking discipline holds no
//! matter which endpoint a client hits.

use crate::error::StoryweaveError;
use crate::orchestrator::{EventReceiver, TurnOrchestrator};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub web_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: String,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SessionRequest {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    session_id: String,
    action: String,
}

#[derive(Debug, Serialize)]
struct StoryResponse {
    story: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error wrapper that maps orchestrator failures onto HTTP statuses
struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<StoryweaveError>() {
            Some(StoryweaveError::BackendUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Some(StoryweaveError::SessionNotFound(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(index))
        .route("/static/*path", get(static_asset))
        .route("/api/generate", post(generate))
        .route("/api/story/get", post(story_get))
        .route("/api/story/new", post(story_new))
        .route("/api/story/turn", post(story_turn))
        .route("/api/story/new_stream", post(story_new_stream))
        .route("/api/story/turn_stream", post(story_turn_stream))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn index(State(state): State<AppState>) -> Response {
    serve_asset(&state.web_dir, "index.html").await
}

async fn static_asset(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    serve_asset(&state.web_dir, &path).await
}

/// Serve one file from the web directory
///
/// Only plain relative paths are accepted; anything containing `..`,
/// a root, or a prefix component is treated as a miss.
async fn serve_asset(web_dir: &std::path::Path, name: &str) -> Response {
    let rel = std::path::Path::new(name);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        tracing::warn!("Rejected static asset path: {}", name);
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(web_dir.join(rel)).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, content_type(name))],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn content_type(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let text = state
        .orchestrator
        .generate_once(&req.prompt, req.model.as_deref())
        .await?;
    Ok(Json(GenerateResponse { text }))
}

async fn story_get(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<StoryResponse>, ApiError> {
    let story = state.orchestrator.get_story(&req.session_id).await?;
    Ok(Json(StoryResponse { story }))
}

async fn story_new(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<StoryResponse>, ApiError> {
    let story = state.orchestrator.new_story(&req.session_id).await?;
    Ok(Json(StoryResponse { story }))
}

async fn story_turn(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Json<StoryResponse>, ApiError> {
    let story = state
        .orchestrator
        .turn(&req.session_id, &req.action)
        .await?;
    Ok(Json(StoryResponse { story }))
}

async fn story_new_stream(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Response, ApiError> {
    let rx = state.orchestrator.new_story_stream(&req.session_id).await?;
    Ok(ndjson_response(rx))
}

async fn story_turn_stream(
    State(state): State<AppState>,
    Json(req): Json<TurnRequest>,
) -> Result<Response, ApiError> {
    let rx = state
        .orchestrator
        .turn_stream(&req.session_id, &req.action)
        .await?;
    Ok(ndjson_response(rx))
}

/// Wrap an orchestrator event stream as a chunked NDJSON body
fn ndjson_response(rx: EventReceiver) -> Response {
    let body = Body::from_stream(UnboundedReceiverStream::new(rx).map(|event| {
        let mut line =
            serde_json::to_string(&event).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        Ok::<_, std::convert::Infallible>(line)
    }));

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response()
}
