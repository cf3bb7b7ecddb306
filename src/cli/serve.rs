use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use webchat_cdp::CdpSurface;
use webchat_scheduler::{AutomationSurface, Bridge};

use crate::config::BridgeConfig;
use crate::fixture::FixtureSurface;
use crate::metrics;
use crate::server::{
    build_router, RateLimitConfig, RateLimiter, ServeHealth, ServeState, DEFAULT_CATALOG_PER_MIN,
    DEFAULT_CHAT_PER_MIN,
};

const RATE_LIMIT_BUCKET_TTL_ENV: &str = "WEBCHAT_RATE_LIMIT_BUCKET_TTL_SECS";
const RATE_LIMIT_GC_ENV: &str = "WEBCHAT_RATE_LIMIT_GC_SECS";

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Port to listen on (overrides config and WEBCHAT_BRIDGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Attach to an existing Chrome DevTools websocket instead of launching Chrome
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Chat page to open
    #[arg(long)]
    pub chat_url: Option<String>,

    /// Answer from a JSON fixture file instead of a browser
    #[arg(long, value_name = "FILE")]
    pub fixture: Option<PathBuf>,

    /// Force headless Chrome
    #[arg(long)]
    pub headless: bool,
}

impl ServeArgs {
    /// Flags win over file and environment values.
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            config.server.host = host.to_string();
        }
        if let Some(ws) = self.ws_url.as_deref().map(str::trim).filter(|w| !w.is_empty()) {
            config.browser.websocket_url = Some(ws.to_string());
        }
        if let Some(url) = self.chat_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            config.browser.chat_url = url.to_string();
        }
        if let Some(path) = &self.fixture {
            config.fixture = Some(path.clone());
        }
        if self.headless {
            config.browser.headless = true;
        }
    }
}

pub async fn cmd_serve(args: ServeArgs, mut config: BridgeConfig) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;
    metrics::register_metrics();

    let surface: Arc<dyn AutomationSurface> = match &config.fixture {
        Some(path) => {
            info!(fixture = %path.display(), "Serving replies from fixture");
            Arc::new(FixtureSurface::from_path(path)?)
        }
        None => {
            match config.browser.websocket_url.as_deref() {
                Some(ws) => info!("Using external DevTools endpoint: {}", ws),
                None => info!(
                    headless = config.browser.headless,
                    "Launching local Chrome"
                ),
            }
            let surface = CdpSurface::connect(config.browser.clone())
                .await
                .context("failed to open the chat page")?;
            Arc::new(surface)
        }
    };
    let surface_name = surface.name().to_string();

    let (bridge, driver) = Bridge::start(surface, config.policy());
    let janitor = bridge.spawn_janitor(
        config.server.response_ttl(),
        config.server.janitor_interval(),
    );

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::from_env(
        DEFAULT_CHAT_PER_MIN,
        DEFAULT_CATALOG_PER_MIN,
    )));
    spawn_rate_limit_cleanup(Arc::clone(&rate_limiter));

    let health = Arc::new(ServeHealth::new());
    let state = ServeState::new(
        bridge.clone(),
        &surface_name,
        config.server.caller_timeout(),
        rate_limiter,
        Arc::clone(&health),
    );
    state.mark_live();
    state.mark_ready();

    let router = build_router().with_state(state.clone());
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind bridge server on {}", addr))?;
    info!(
        surface = %surface_name,
        caller_timeout_secs = config.server.caller_timeout_secs,
        "Bridge listening on http://{}",
        addr
    );

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("bridge server exited unexpectedly");

    state.mark_unready("shutting down");
    bridge.shutdown();
    janitor.abort();
    if let Err(err) = driver.await {
        error!(?err, "session driver task failed");
    }
    info!("Bridge stopped");
    served
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn spawn_rate_limit_cleanup(rate_limiter: Arc<RateLimiter>) {
    let ttl = resolve_rate_limit_bucket_ttl();
    if ttl.is_zero() {
        info!("Rate limiter bucket GC disabled (ttl=0)");
        return;
    }
    let gc_interval = resolve_rate_limit_gc_interval();
    info!(
        ttl_secs = ttl.as_secs(),
        interval_secs = gc_interval.as_secs(),
        "Rate limiter GC enabled"
    );
    tokio::spawn(async move {
        let mut ticker = interval(gc_interval);
        loop {
            ticker.tick().await;
            let removed = rate_limiter.prune_idle(ttl);
            if removed > 0 {
                debug!(
                    removed,
                    remaining = rate_limiter.bucket_count(),
                    "Pruned stale rate limit buckets"
                );
            }
        }
    });
}

fn resolve_rate_limit_bucket_ttl() -> Duration {
    match env::var(RATE_LIMIT_BUCKET_TTL_ENV) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(err) => {
                warn!(?err, value = raw, "invalid {}", RATE_LIMIT_BUCKET_TTL_ENV);
                Duration::from_secs(600)
            }
        },
        Err(_) => Duration::from_secs(600),
    }
}

fn resolve_rate_limit_gc_interval() -> Duration {
    match env::var(RATE_LIMIT_GC_ENV) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(0) => Duration::from_secs(30),
            Ok(secs) => Duration::from_secs(secs.max(5)),
            Err(err) => {
                warn!(?err, value = raw, "invalid {}", RATE_LIMIT_GC_ENV);
                Duration::from_secs(60)
            }
        },
        Err(_) => Duration::from_secs(60),
    }
}
