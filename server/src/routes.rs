//! HTTP route handlers.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/reconstruct` | Run a reconstruction (JSON or SSE stream) |
//! | `GET`  | `/api/sessions/{id}` | Session snapshot |
//! | `POST` | `/api/sessions/{id}/abort` | Abort a running session |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! With `"stream": true` the reconstruct endpoint answers with a
//! Server-Sent-Events stream of `progress` / `complete` / `aborted` /
//! `error` events; otherwise it blocks and returns one JSON body.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};

use redraft_core::session::{ProgressEvent, SessionSnapshot};
use redraft_core::{Engine, Fidelity, Outcome, ReconstructionRequest};

use crate::error::ApiError;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/reconstruct", post(reconstruct))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/abort", post(abort_session))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Inbound reconstruction request. Accepts both snake_case and camelCase
/// field names.
#[derive(Debug, Deserialize)]
pub struct ReconstructBody {
    #[serde(default)]
    text: String,
    #[serde(default, alias = "customInstructions")]
    custom_instructions: Option<String>,
    #[serde(default, alias = "fidelityLevel")]
    fidelity_level: Option<Fidelity>,
    #[serde(default, alias = "targetDomain")]
    target_domain: Option<String>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ReconstructResponse {
    success: bool,
    #[serde(flatten)]
    outcome: Outcome,
}

async fn reconstruct(
    State(state): State<AppState>,
    Json(body): Json<ReconstructBody>,
) -> Result<Response, ApiError> {
    let request = ReconstructionRequest {
        text: body.text,
        custom_instructions: body.custom_instructions,
        fidelity: body.fidelity_level.unwrap_or_default(),
        target_domain: body.target_domain,
    };

    if body.stream {
        let (session_id, rx) = state.engine.reconstruct_streaming(request).await?;
        tracing::info!(session_id = %session_id, "Streaming reconstruction started");

        let stream = ReceiverStream::new(rx).map(|event| to_sse_event(&event));
        Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let outcome = state.engine.reconstruct(request).await?;
        Ok(Json(ReconstructResponse {
            success: true,
            outcome,
        })
        .into_response())
    }
}

fn to_sse_event(event: &ProgressEvent) -> Result<Event, Infallible> {
    let name = match event {
        ProgressEvent::Progress(_) => "progress",
        ProgressEvent::Complete(_) => "complete",
        ProgressEvent::Aborted { .. } => "aborted",
        ProgressEvent::Error { .. } => "error",
    };
    Ok(Event::default()
        .event(name)
        .json_data(event)
        .unwrap_or_else(|e| {
            Event::default()
                .event("error")
                .data(format!("event serialization failed: {}", e))
        }))
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    success: bool,
    #[serde(flatten)]
    session: SessionSnapshot,
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    match state.engine.session(&id).await {
        Some(session) => Ok(Json(SessionResponse {
            success: true,
            session,
        })),
        None => Err(ApiError::session_not_found(&id)),
    }
}

#[derive(Debug, Serialize)]
struct AbortResponse {
    success: bool,
    #[serde(flatten)]
    receipt: redraft_core::AbortReceipt,
}

async fn abort_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AbortResponse>, ApiError> {
    match state.engine.abort(&id).await {
        Some(receipt) => Ok(Json(AbortResponse {
            success: true,
            receipt,
        })),
        None => Err(ApiError::session_not_found(&id)),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "redraft",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
