use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use webchat_scheduler::Bridge;

use super::rate_limit::RateLimiter;

#[derive(Clone)]
pub(crate) struct ServeState {
    pub(crate) bridge: Bridge,
    pub(crate) surface_name: Arc<str>,
    pub(crate) caller_timeout: Duration,
    pub(crate) rate_limiter: Arc<RateLimiter>,
    pub(crate) health: Arc<ServeHealth>,
}

impl ServeState {
    pub(crate) fn new(
        bridge: Bridge,
        surface_name: &str,
        caller_timeout: Duration,
        rate_limiter: Arc<RateLimiter>,
        health: Arc<ServeHealth>,
    ) -> Self {
        Self {
            bridge,
            surface_name: Arc::from(surface_name),
            caller_timeout,
            rate_limiter,
            health,
        }
    }

    pub(crate) fn health_snapshot(&self) -> ServeHealthSnapshot {
        self.health.snapshot()
    }

    pub(crate) fn mark_live(&self) {
        self.health.mark_live();
    }

    pub(crate) fn mark_ready(&self) {
        self.health.mark_ready();
    }

    pub(crate) fn mark_unready(&self, error: impl Into<String>) {
        self.health.mark_unready(error);
    }
}

#[derive(Default)]
pub(crate) struct ServeHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_ready_check: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ServeHealth {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.update_last_check();
        *self.last_error.lock() = None;
    }

    pub(crate) fn mark_unready(&self, error: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        self.update_last_check();
        *self.last_error.lock() = Some(error.into());
    }

    pub(crate) fn snapshot(&self) -> ServeHealthSnapshot {
        ServeHealthSnapshot {
            ready: self.ready.load(Ordering::SeqCst),
            live: self.live.load(Ordering::SeqCst),
            last_ready_check: self.last_ready_check(),
            last_error: self.last_error.lock().clone(),
        }
    }

    fn update_last_check(&self) {
        if let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.last_ready_check
                .store(duration.as_secs(), Ordering::SeqCst);
        }
    }

    fn last_ready_check(&self) -> Option<u64> {
        match self.last_ready_check.load(Ordering::SeqCst) {
            0 => None,
            value => Some(value),
        }
    }
}

pub(crate) struct ServeHealthSnapshot {
    pub(crate) ready: bool,
    pub(crate) live: bool,
    pub(crate) last_ready_check: Option<u64>,
    pub(crate) last_error: Option<String>,
}
