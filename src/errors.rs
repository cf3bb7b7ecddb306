//! HTTP-facing errors.
//!
//! One error type serves both API dialects; the dialect only decides the JSON
//! shape of the body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use webchat_scheduler::BridgeError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Too many requests")]
    RateLimited,
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI `error.type` value.
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "invalid_request_error",
            ApiError::RateLimited => "rate_limit_error",
            ApiError::Unavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "server_error",
        }
    }

    /// Ollama-style `{"error": "..."}` response.
    pub fn into_ollama_response(self) -> Response {
        (self.http_status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::EmptyPrompt => ApiError::Validation(err.to_string()),
            BridgeError::ShutDown => ApiError::Unavailable(err.to_string()),
            BridgeError::MissingSlot(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        }));
        (self.http_status(), body).into_response()
    }
}

/// Wraps [`ApiError`] for handlers that answer in the Ollama dialect.
#[derive(Debug)]
pub struct OllamaError(pub ApiError);

impl From<ApiError> for OllamaError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<BridgeError> for OllamaError {
    fn from(err: BridgeError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for OllamaError {
    fn into_response(self) -> Response {
        self.0.into_ollama_response()
    }
}
