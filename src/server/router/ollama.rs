use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use super::{with_turn_headers, MODELS};
use crate::errors::{ApiError, OllamaError};
use crate::metrics;
use crate::prompt::approx_tokens;
use crate::server::completion::{accept_chat, complete};
use crate::server::rate_limit::RateLimitKind;
use crate::server::state::ServeState;

const NDJSON: &str = "application/x-ndjson";

pub(super) fn router() -> Router<ServeState> {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/tags", get(tags))
}

async fn chat(
    State(state): State<ServeState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let response = match answer(&state, client, &body).await {
        Ok(response) => response,
        Err(err) => OllamaError(err).into_response(),
    };
    metrics::record_chat_request("ollama", response.status().as_u16());
    response
}

async fn answer(state: &ServeState, client: SocketAddr, body: &[u8]) -> Result<Response, ApiError> {
    let (request, flat) = accept_chat(state, client, body)?;
    let completion = complete(state, &flat).await?;

    let payload = json!({
        "model": flat.model,
        "created_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "message": {"role": "assistant", "content": completion.content},
        "done": true,
        "done_reason": "stop",
        "prompt_eval_count": flat.prompt_tokens,
        "eval_count": approx_tokens(&completion.content),
        "eval_duration": u64::try_from(completion.elapsed.as_nanos()).unwrap_or(u64::MAX),
    });

    // A streamed reply is the same object as a single NDJSON line.
    let response = if request.streaming() {
        (
            [(header::CONTENT_TYPE, HeaderValue::from_static(NDJSON))],
            format!("{payload}\n"),
        )
            .into_response()
    } else {
        Json(payload).into_response()
    };
    Ok(with_turn_headers(response, &completion))
}

async fn tags(
    State(state): State<ServeState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
) -> Result<Json<Value>, OllamaError> {
    if !state
        .rate_limiter
        .allow(&client.ip().to_string(), RateLimitKind::Catalog)
    {
        return Err(ApiError::RateLimited.into());
    }
    let models: Vec<Value> = MODELS
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "model": name,
                "modified_at": "",
                "size": 0,
                "digest": "",
                "details": {"family": "deepseek", "format": "web"},
            })
        })
        .collect();
    Ok(Json(json!({ "models": models })))
}
