//! API error types for HTTP responses.
//!
//! Every error serializes as `{"error": {"code": "...", "message": "..."}}`
//! with a snake_case `code` field for client matching.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use redraft_core::error::EngineError;

/// Errors returned by API handlers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ApiError {
    InvalidInput { message: String },
    SessionNotFound { message: String },
    ProviderError { message: String },
    InternalError { message: String },
}

impl ApiError {
    pub fn session_not_found(id: &str) -> Self {
        Self::SessionNotFound {
            message: format!("Session not found: {}", id),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::ProviderError { .. } => StatusCode::BAD_GATEWAY,
            ApiError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidInput(message) => ApiError::InvalidInput { message },
            EngineError::SessionNotFound(id) => ApiError::session_not_found(&id),
            EngineError::Provider(e) => ApiError::ProviderError {
                message: e.to_string(),
            },
            EngineError::Internal(e) => ApiError::InternalError {
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "error": self }))).into_response()
    }
}
