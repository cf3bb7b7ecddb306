use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use webchat_scheduler::{ReplyOutcome, RequestId};

use crate::errors::ApiError;
use crate::parsers::{normalize, EMPTY_REPLY_PLACEHOLDER};
use crate::prompt::{flatten, ChatRequest, FlattenedPrompt};

use super::rate_limit::RateLimitKind;
use super::state::ServeState;

pub(crate) struct Completion {
    pub(crate) id: RequestId,
    pub(crate) content: String,
    pub(crate) outcome: ReplyOutcome,
    pub(crate) elapsed: Duration,
}

/// Rate limit, parse and flatten a chat body. An empty body reads as `{}`.
pub(crate) fn accept_chat(
    state: &ServeState,
    client: SocketAddr,
    body: &[u8],
) -> Result<(ChatRequest, FlattenedPrompt), ApiError> {
    if !state
        .rate_limiter
        .allow(&client.ip().to_string(), RateLimitKind::Chat)
    {
        warn!(client = %client.ip(), "chat request rate limited");
        return Err(ApiError::RateLimited);
    }

    let request: ChatRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ChatRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|err| ApiError::validation(format!("Invalid JSON body: {err}")))?
    };
    let flat = flatten(&request)?;
    Ok((request, flat))
}

/// Runs one turn through the bridge and normalizes the reply.
pub(crate) async fn complete(
    state: &ServeState,
    flat: &FlattenedPrompt,
) -> Result<Completion, ApiError> {
    let started = Instant::now();
    let reply = state.bridge.ask(&flat.prompt, state.caller_timeout).await?;

    let mut content = normalize(&reply.text, flat.want_json_only);
    if content.trim().is_empty() {
        content = EMPTY_REPLY_PLACEHOLDER.to_string();
    }

    let elapsed = started.elapsed();
    info!(
        request_id = %reply.id,
        outcome = ?reply.outcome,
        raw_chars = reply.text.chars().count(),
        chars = content.chars().count(),
        want_json = flat.want_json_only,
        elapsed_ms = elapsed.as_millis() as u64,
        "chat turn answered"
    );

    Ok(Completion {
        id: reply.id,
        content,
        outcome: reply.outcome,
        elapsed,
    })
}
