//! HTTP front end: OpenAI and Ollama dialects over one [`webchat_scheduler::Bridge`].

mod completion;
pub(crate) mod rate_limit;
mod router;
mod state;

pub(crate) use rate_limit::{
    RateLimitConfig, RateLimiter, DEFAULT_CATALOG_PER_MIN, DEFAULT_CHAT_PER_MIN,
};
pub(crate) use router::build_router;
pub(crate) use state::{ServeHealth, ServeState};
