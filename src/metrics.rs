use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{IntCounterVec, Opts, Registry};
use tracing::error;
use webchat_cdp::metrics as cdp_metrics;
use webchat_scheduler::metrics as scheduler_metrics;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

lazy_static! {
    static ref CHAT_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "webchat_http_chat_requests_total",
            "Chat requests answered, by API dialect and status"
        ),
        &["api", "status"]
    )
    .unwrap();
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        scheduler_metrics::register_metrics(registry);
        cdp_metrics::register_metrics(registry);
        if let Err(err) = registry.register(Box::new(CHAT_REQUESTS.clone())) {
            error!(?err, "failed to register http metrics");
        }
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn record_chat_request(api: &str, status: u16) {
    CHAT_REQUESTS
        .with_label_values(&[api, &status.to_string()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_exposes_bridge_families() {
        register_metrics();
        record_chat_request("openai", 200);
        let names: Vec<String> = global_registry()
            .gather()
            .into_iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.iter().any(|name| name == "webchat_http_chat_requests_total"));
        assert!(names.iter().any(|name| name == "webchat_queue_depth"));
    }
}
