//! Prometheus series for the DevTools surface. Registered into the bridge's
//! registry by the server.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Registry,
};
use tracing::error;

lazy_static! {
    static ref CDP_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "webchat_cdp_commands_total",
            "DevTools commands sent to the chat page"
        ),
        &["method", "outcome"]
    )
    .unwrap();
    static ref CDP_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "webchat_cdp_command_duration_seconds",
            "Round trip of a DevTools command",
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0]
        ),
        &["method"]
    )
    .unwrap();
    static ref CDP_PAGE_ATTACHES_TOTAL: IntCounter = IntCounter::new(
        "webchat_cdp_page_attaches_total",
        "Times the surface attached to a chat tab"
    )
    .unwrap();
    static ref CDP_PAGE_DROPS_TOTAL: IntCounter = IntCounter::new(
        "webchat_cdp_page_drops_total",
        "Cached chat tabs discarded after a failed command"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CDP_COMMANDS_TOTAL.clone());
    register(registry, CDP_COMMAND_DURATION.clone());
    register(registry, CDP_PAGE_ATTACHES_TOTAL.clone());
    register(registry, CDP_PAGE_DROPS_TOTAL.clone());
}

/// Count one command; latency is only observed for commands that succeeded.
pub(crate) fn record_command(method: &str, elapsed: Duration, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    CDP_COMMANDS_TOTAL
        .with_label_values(&[method, outcome])
        .inc();
    if ok {
        CDP_COMMAND_DURATION
            .with_label_values(&[method])
            .observe(elapsed.as_secs_f64());
    }
}

pub(crate) fn record_page_attach() {
    CDP_PAGE_ATTACHES_TOTAL.inc();
}

pub(crate) fn record_page_drop() {
    CDP_PAGE_DROPS_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_commands_skip_the_latency_histogram() {
        let method = "test.read_reply";
        record_command(method, Duration::from_millis(3), true);
        record_command(method, Duration::from_millis(900), false);

        assert_eq!(CDP_COMMANDS_TOTAL.with_label_values(&[method, "ok"]).get(), 1);
        assert_eq!(CDP_COMMANDS_TOTAL.with_label_values(&[method, "error"]).get(), 1);
        let latency = CDP_COMMAND_DURATION.with_label_values(&[method]);
        assert_eq!(latency.get_sample_count(), 1);
        assert!(latency.get_sample_sum() < 0.1);
    }

    #[test]
    fn registers_into_a_fresh_registry_once() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_page_attach();
        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"webchat_cdp_page_attaches_total".to_string()));
    }
}
