use std::env;
use std::time::{Duration, Instant};

use dashmap::DashMap;

pub(crate) const RATE_LIMIT_CHAT_ENV: &str = "WEBCHAT_RATE_LIMIT_CHAT";
pub(crate) const RATE_LIMIT_CATALOG_ENV: &str = "WEBCHAT_RATE_LIMIT_CATALOG";

/// Chat is unlimited unless `WEBCHAT_RATE_LIMIT_CHAT` opts in; the session
/// queue already serializes turns.
pub(crate) const DEFAULT_CHAT_PER_MIN: u32 = 0;
pub(crate) const DEFAULT_CATALOG_PER_MIN: u32 = 120;

#[derive(Clone, Copy, Debug)]
pub(crate) enum RateLimitKind {
    /// Completion requests that occupy the chat session.
    Chat,
    /// Model listings.
    Catalog,
}

/// Requests per minute per client address; `0` disables the limit.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RateLimitConfig {
    pub(crate) chat_per_min: u32,
    pub(crate) catalog_per_min: u32,
}

impl RateLimitConfig {
    pub(crate) fn from_env(default_chat: u32, default_catalog: u32) -> Self {
        Self {
            chat_per_min: env_limit(RATE_LIMIT_CHAT_ENV, default_chat),
            catalog_per_min: env_limit(RATE_LIMIT_CATALOG_ENV, default_catalog),
        }
    }

    pub(crate) fn unlimited() -> Self {
        Self {
            chat_per_min: 0,
            catalog_per_min: 0,
        }
    }
}

fn env_limit(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

pub(crate) struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    limits: RateLimitConfig,
}

impl RateLimiter {
    pub(crate) fn new(limits: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            limits,
        }
    }

    pub(crate) fn allow(&self, key: &str, kind: RateLimitKind) -> bool {
        let capacity = match kind {
            RateLimitKind::Chat => self.limits.chat_per_min,
            RateLimitKind::Catalog => self.limits.catalog_per_min,
        };
        if capacity == 0 {
            return true;
        }
        let refill = capacity as f64 / 60.0;

        let bucket_key = format!("{}:{kind:?}", key);
        let mut entry = self
            .buckets
            .entry(bucket_key)
            .or_insert_with(|| TokenBucket::new(capacity));
        entry.allow(capacity, refill)
    }

    pub(crate) fn prune_idle(&self, max_idle: Duration) -> usize {
        if max_idle.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_idle(now, max_idle));
        before.saturating_sub(self.buckets.len())
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[derive(Clone)]
struct TokenBucket {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last: Instant::now(),
        }
    }

    fn allow(&mut self, capacity: u32, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity as f64);
        self.last = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_idle(&self, now: Instant, max_idle: Duration) -> bool {
        now.duration_since(self.last) >= max_idle
    }
}

#[cfg(test)]
mod tests {
    use super::{RateLimitConfig, RateLimitKind, RateLimiter, TokenBucket};
    use std::time::{Duration, Instant};

    #[test]
    fn chat_bucket_empties_then_refuses() {
        let limiter = RateLimiter::new(RateLimitConfig {
            chat_per_min: 2,
            catalog_per_min: 0,
        });
        assert!(limiter.allow("10.0.0.1", RateLimitKind::Chat));
        assert!(limiter.allow("10.0.0.1", RateLimitKind::Chat));
        assert!(!limiter.allow("10.0.0.1", RateLimitKind::Chat));
        assert!(limiter.allow("10.0.0.2", RateLimitKind::Chat));
        // zero capacity never limits and never allocates a bucket
        for _ in 0..10 {
            assert!(limiter.allow("10.0.0.1", RateLimitKind::Catalog));
        }
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn prune_idle_removes_stale_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            chat_per_min: 10,
            catalog_per_min: 5,
        });
        limiter
            .buckets
            .insert("client:Chat".into(), TokenBucket::new(5));
        limiter.buckets.insert(
            "client:Catalog".into(),
            TokenBucket {
                tokens: 0.0,
                last: Instant::now() - Duration::from_secs(600),
            },
        );

        let removed = limiter.prune_idle(Duration::from_secs(300));
        assert_eq!(removed, 1);
        assert!(limiter.buckets.contains_key("client:Chat"));
        assert!(!limiter.buckets.contains_key("client:Catalog"));
    }
}
