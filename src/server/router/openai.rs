use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{with_turn_headers, MODELS};
use crate::errors::ApiError;
use crate::metrics;
use crate::prompt::{approx_tokens, FlattenedPrompt};
use crate::server::completion::{accept_chat, complete, Completion};
use crate::server::rate_limit::RateLimitKind;
use crate::server::state::ServeState;

const OWNER: &str = "webchat-bridge";
const FINGERPRINT: &str = concat!("fp_webchat_", env!("CARGO_PKG_VERSION"));

pub(super) fn router() -> Router<ServeState> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
}

async fn chat_completions(
    State(state): State<ServeState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let response = match answer(&state, client, &body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    metrics::record_chat_request("openai", response.status().as_u16());
    response
}

async fn answer(state: &ServeState, client: SocketAddr, body: &[u8]) -> Result<Response, ApiError> {
    let (request, flat) = accept_chat(state, client, body)?;
    let completion = complete(state, &flat).await?;
    let id = completion_id();
    let created = Utc::now().timestamp();

    let response = if request.streaming() {
        stream_response(&id, created, &flat, &completion)
    } else {
        Json(completion_body(&id, created, &flat, &completion)).into_response()
    };
    Ok(with_turn_headers(response, &completion))
}

/// `chatcmpl-` followed by 24 hex characters.
fn completion_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..24])
}

fn usage(flat: &FlattenedPrompt, content: &str) -> Value {
    let completion_tokens = approx_tokens(content);
    json!({
        "prompt_tokens": flat.prompt_tokens,
        "completion_tokens": completion_tokens,
        "total_tokens": flat.prompt_tokens + completion_tokens,
        "prompt_cache_hit_tokens": 0,
        "prompt_cache_miss_tokens": flat.prompt_tokens,
    })
}

fn completion_body(id: &str, created: i64, flat: &FlattenedPrompt, completion: &Completion) -> Value {
    json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": flat.model,
        "system_fingerprint": FINGERPRINT,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": completion.content},
            "logprobs": null,
            "finish_reason": "stop",
        }],
        "usage": usage(flat, &completion.content),
    })
}

/// The whole reply as one chunk, then `[DONE]`.
fn stream_response(
    id: &str,
    created: i64,
    flat: &FlattenedPrompt,
    completion: &Completion,
) -> Response {
    let chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": flat.model,
        "system_fingerprint": FINGERPRINT,
        "choices": [{
            "index": 0,
            "delta": {"role": "assistant", "content": completion.content},
            "logprobs": null,
            "finish_reason": "stop",
        }],
        "usage": usage(flat, &completion.content),
    });
    let events = vec![
        Ok::<_, Infallible>(Event::default().data(chunk.to_string())),
        Ok(Event::default().data("[DONE]")),
    ];

    let mut response = Sse::new(stream::iter(events)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

async fn list_models(
    State(state): State<ServeState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
) -> Result<Json<Value>, ApiError> {
    if !state
        .rate_limiter
        .allow(&client.ip().to_string(), RateLimitKind::Catalog)
    {
        return Err(ApiError::RateLimited);
    }
    let created = Utc::now().timestamp();
    let data: Vec<Value> = MODELS
        .iter()
        .map(|name| {
            json!({
                "id": name,
                "object": "model",
                "created": created,
                "owned_by": OWNER,
            })
        })
        .collect();
    Ok(Json(json!({ "object": "list", "data": data })))
}
