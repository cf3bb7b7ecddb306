use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, Histogram, IntCounter, IntCounterVec, IntGauge, Registry,
};
use tracing::error;

use crate::model::SlotKind;

static ENQUEUED: AtomicU64 = AtomicU64::new(0);
static STARTED: AtomicU64 = AtomicU64::new(0);
static COMPLETED: AtomicU64 = AtomicU64::new(0);
static FAILED: AtomicU64 = AtomicU64::new(0);
static SAFETY_NET_FIRED: AtomicU64 = AtomicU64::new(0);
static CALLER_TIMEOUTS: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref REQUESTS_ENQUEUED_TOTAL: IntCounter = IntCounter::new(
        "webchat_requests_enqueued_total",
        "Total requests accepted by the broker"
    )
    .unwrap();
    static ref TURNS_STARTED_TOTAL: IntCounter =
        IntCounter::new("webchat_turns_started_total", "Total turns started").unwrap();
    static ref TURNS_COMPLETED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("webchat_turns_completed_total", "Total turns by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref POLL_TICKS_TOTAL: IntCounter = IntCounter::new(
        "webchat_poll_ticks_total",
        "Total reply samples taken by the completion detector"
    )
    .unwrap();
    static ref CALLER_TIMEOUTS_TOTAL: IntCounter = IntCounter::new(
        "webchat_caller_timeouts_total",
        "Total callers that stopped waiting before their turn finished"
    )
    .unwrap();
    static ref QUEUE_DEPTH: IntGauge =
        IntGauge::new("webchat_queue_depth", "Requests waiting for the session").unwrap();
    static ref TURN_DURATION: Histogram = Histogram::with_opts(histogram_opts!(
        "webchat_turn_duration_seconds",
        "Wall time a turn held the session",
        vec![1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 120.0]
    ))
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register scheduler metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, REQUESTS_ENQUEUED_TOTAL.clone());
    register(registry, TURNS_STARTED_TOTAL.clone());
    register(registry, TURNS_COMPLETED_TOTAL.clone());
    register(registry, POLL_TICKS_TOTAL.clone());
    register(registry, CALLER_TIMEOUTS_TOTAL.clone());
    register(registry, QUEUE_DEPTH.clone());
    register(registry, TURN_DURATION.clone());
}

pub fn record_enqueued(queue_depth: usize) {
    ENQUEUED.fetch_add(1, Ordering::Relaxed);
    REQUESTS_ENQUEUED_TOTAL.inc();
    QUEUE_DEPTH.set(queue_depth as i64);
}

pub fn record_started(queue_depth: usize) {
    STARTED.fetch_add(1, Ordering::Relaxed);
    TURNS_STARTED_TOTAL.inc();
    QUEUE_DEPTH.set(queue_depth as i64);
}

pub fn record_completed(kind: SlotKind, elapsed: Duration) {
    if kind.is_failure() {
        FAILED.fetch_add(1, Ordering::Relaxed);
    } else {
        COMPLETED.fetch_add(1, Ordering::Relaxed);
    }
    if kind == SlotKind::SafetyNet {
        SAFETY_NET_FIRED.fetch_add(1, Ordering::Relaxed);
    }
    TURNS_COMPLETED_TOTAL
        .with_label_values(&[kind.as_str()])
        .inc();
    TURN_DURATION.observe(elapsed.as_secs_f64());
}

pub fn record_poll_tick() {
    POLL_TICKS_TOTAL.inc();
}

pub fn record_caller_timeout() {
    CALLER_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
    CALLER_TIMEOUTS_TOTAL.inc();
}

#[derive(Clone, Debug, Default)]
pub struct SchedulerMetricsSnapshot {
    pub enqueued: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub safety_net_fired: u64,
    pub caller_timeouts: u64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        enqueued: ENQUEUED.load(Ordering::Relaxed),
        started: STARTED.load(Ordering::Relaxed),
        completed: COMPLETED.load(Ordering::Relaxed),
        failed: FAILED.load(Ordering::Relaxed),
        safety_net_fired: SAFETY_NET_FIRED.load(Ordering::Relaxed),
        caller_timeouts: CALLER_TIMEOUTS.load(Ordering::Relaxed),
    }
}
