use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::State, routing::get, Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;
use webchat_scheduler::ReplyOutcome;

use crate::metrics;

mod ollama;
mod openai;

use super::state::ServeState;

/// Model names advertised by the listing endpoints.
pub(crate) const MODELS: &[&str] = &["deepseek-chat", "deepseek-reasoner"];

const OUTCOME_HEADER: &str = "x-webchat-outcome";
const REQUEST_ID_HEADER: &str = "x-request-id";

pub(crate) fn build_router() -> Router<ServeState> {
    shell_router()
        .merge(openai::router())
        .merge(ollama::router())
        .layer(cors_layer())
}

fn shell_router() -> Router<ServeState> {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/livez", get(live_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn outcome_label(outcome: ReplyOutcome) -> &'static str {
    match outcome {
        ReplyOutcome::Turn(kind) => kind.as_str(),
        ReplyOutcome::CallerTimeout => "caller_timeout",
    }
}

/// Tags a chat response with its request id and how the turn ended.
fn with_turn_headers(
    mut response: Response,
    completion: &super::completion::Completion,
) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(OUTCOME_HEADER),
        HeaderValue::from_static(outcome_label(completion.outcome)),
    );
    if let Ok(value) = HeaderValue::from_str(&completion.id.to_string()) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn index_handler(State(state): State<ServeState>) -> Json<Value> {
    Json(json!({
        "service": "webchat-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "build_date": env!("BUILD_DATE"),
        "git_hash": env!("GIT_HASH"),
        "surface": state.surface_name.as_ref(),
        "endpoints": [
            "POST /v1/chat/completions",
            "GET /v1/models",
            "POST /api/chat",
            "GET /api/tags",
            "GET /health",
            "GET /livez",
            "GET /readyz",
            "GET /metrics",
        ],
        "hint": "No API key. messages may carry a system prompt; tools/functions are injected when enable_function_call or tool_choice asks for them.",
    }))
}

async fn health_handler(State(state): State<ServeState>) -> Json<Value> {
    let snapshot = state.health_snapshot();
    let session = state.bridge.session_snapshot();
    Json(json!({
        "status": "ok",
        "surface": state.surface_name.as_ref(),
        "ready": snapshot.ready,
        "live": snapshot.live,
        "last_ready_check_ts": snapshot.last_ready_check,
        "last_error": snapshot.last_error,
        "queue_depth": state.bridge.queue_depth(),
        "pending_slots": state.bridge.pending_slots(),
        "session": session,
    }))
}

async fn live_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let snapshot = state.health_snapshot();
    let status = if snapshot.live {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "live": snapshot.live,
            "ready": snapshot.ready,
        })),
    )
}

async fn ready_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let snapshot = state.health_snapshot();
    let ready = snapshot.ready && !state.bridge.is_shut_down();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "queue_depth": state.bridge.queue_depth(),
            "last_ready_check_ts": snapshot.last_ready_check,
            "last_error": snapshot.last_error,
        })),
    )
}

async fn metrics_handler() -> Response {
    metrics::register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metrics::global_registry().gather(), &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(body) => match HeaderValue::from_str(encoder.format_type()) {
            Ok(content_type) => {
                ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
            }
            Err(err) => {
                error!(?err, "failed to build content-type header for metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
            }
        },
        Err(err) => {
            error!(?err, "failed to convert prometheus metrics to utf8");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}
