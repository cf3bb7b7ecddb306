use std::fs;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;
use webchat_scheduler::{AutomationSurface, SurfaceError};

use crate::config::CdpConfig;
use crate::error::CdpSurfaceError;
use crate::metrics;
use crate::resolve_chrome_path;
use crate::scripts;

/// Drives a chat page in Chromium over the DevTools protocol.
pub struct CdpSurface {
    config: CdpConfig,
    browser: Browser,
    page: Mutex<Option<Page>>,
    handler_task: JoinHandle<()>,
    reply_script: String,
}

impl CdpSurface {
    /// Attaches to `websocket_url` when set, otherwise launches Chromium, then
    /// opens (or reuses) the chat tab.
    pub async fn connect(config: CdpConfig) -> Result<Self, CdpSurfaceError> {
        config.validate()?;

        let (browser, mut handler) = match config.websocket_url.clone() {
            Some(ws_url) => Browser::connect(ws_url.clone()).await.map_err(|err| {
                CdpSurfaceError::Connect {
                    url: ws_url,
                    message: err.to_string(),
                }
            })?,
            None => {
                let browser_cfg = browser_config(&config)?;
                Browser::launch(browser_cfg)
                    .await
                    .map_err(|err| CdpSurfaceError::Launch(err.to_string()))?
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target: "cdp-surface", %err, "browser handler error");
                }
            }
            warn!(target: "cdp-surface", "browser connection closed");
        });

        let reply_script = scripts::reply_script(
            &config.reply_root_locators,
            &config.reply_fallback_locators,
            &config.welcome_markers,
        );
        let surface = Self {
            config,
            browser,
            page: Mutex::new(None),
            handler_task,
            reply_script,
        };
        surface.page().await?;
        info!(target: "cdp-surface", url = %surface.config.chat_url, "chat page attached");
        Ok(surface)
    }

    pub fn config(&self) -> &CdpConfig {
        &self.config
    }

    async fn page(&self) -> Result<Page, CdpSurfaceError> {
        let mut guard = self.page.lock().await;
        if let Some(page) = guard.as_ref() {
            return Ok(page.clone());
        }
        let page = self.open_chat_page().await?;
        metrics::record_page_attach();
        *guard = Some(page.clone());
        Ok(page)
    }

    async fn open_chat_page(&self) -> Result<Page, CdpSurfaceError> {
        let pages = self
            .browser
            .pages()
            .await
            .map_err(|err| CdpSurfaceError::Page(err.to_string()))?;
        for page in pages {
            if let Ok(Some(url)) = page.url().await {
                if same_site(&url, &self.config.chat_url) {
                    debug!(target: "cdp-surface", %url, "reusing open chat tab");
                    return Ok(page);
                }
            }
        }
        info!(target: "cdp-surface", url = %self.config.chat_url, "opening chat tab");
        self.browser
            .new_page(self.config.chat_url.as_str())
            .await
            .map_err(|err| CdpSurfaceError::Page(err.to_string()))
    }

    /// Forget the cached tab so the next call re-attaches.
    async fn drop_page(&self) {
        if self.page.lock().await.take().is_some() {
            metrics::record_page_drop();
        }
    }

    async fn evaluate(&self, label: &str, script: String) -> Result<Value, CdpSurfaceError> {
        let page = self.page().await?;
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .build()
            .map_err(|err| CdpSurfaceError::command(label, err))?;

        let started = Instant::now();
        let outcome = page.evaluate_expression(params).await;
        metrics::record_command(label, started.elapsed(), outcome.is_ok());
        match outcome {
            Ok(result) => Ok(result.value().cloned().unwrap_or(Value::Null)),
            Err(err) => {
                self.drop_page().await;
                Err(CdpSurfaceError::command(label, err))
            }
        }
    }

    async fn press_enter(&self) -> Result<(), CdpSurfaceError> {
        const METHOD: &str = "Input.dispatchKeyEvent";
        let page = self.page().await?;
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut builder = DispatchKeyEventParams::builder()
                .r#type(kind.clone())
                .key("Enter")
                .code("Enter")
                .windows_virtual_key_code(13);
            if matches!(kind, DispatchKeyEventType::KeyDown) {
                builder = builder.text("\r").unmodified_text("\r");
            }
            let params = builder
                .build()
                .map_err(|err| CdpSurfaceError::command(METHOD, err))?;

            let started = Instant::now();
            let outcome = page.execute(params).await;
            metrics::record_command(METHOD, started.elapsed(), outcome.is_ok());
            outcome.map_err(|err| CdpSurfaceError::command(METHOD, err))?;
        }
        Ok(())
    }
}

impl Drop for CdpSurface {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

#[async_trait]
impl AutomationSurface for CdpSurface {
    async fn submit(&self, prompt: &str) -> Result<bool, SurfaceError> {
        let script = scripts::inject_script(prompt, &self.config.input_locators);
        let found = self.evaluate("inject", script).await?;
        if !found.as_bool().unwrap_or(false) {
            warn!(
                target: "cdp-surface",
                locator = %self.config.input_locators.name,
                "no visible chat input matched"
            );
            return Ok(false);
        }
        sleep(Duration::from_millis(self.config.submit_delay_ms)).await;
        self.press_enter().await?;
        Ok(true)
    }

    async fn sample_reply(&self) -> Result<String, SurfaceError> {
        let value = self.evaluate("sample", self.reply_script.clone()).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn name(&self) -> &str {
        "cdp"
    }
}

/// True when both URLs point at the same host (scheme and path ignored).
pub fn same_site(candidate: &str, chat_url: &str) -> bool {
    match (Url::parse(candidate), Url::parse(chat_url)) {
        (Ok(a), Ok(b)) => match (a.host_str(), b.host_str()) {
            (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
            _ => false,
        },
        _ => false,
    }
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, CdpSurfaceError> {
    let (executable, source) =
        resolve_chrome_path(cfg).ok_or(CdpSurfaceError::ChromeNotFound)?;
    info!(executable = %executable.display(), ?source, "resolved Chrome binary");

    let profile_dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        let cwd = std::env::current_dir().map_err(|err| {
            CdpSurfaceError::Launch(format!("failed to resolve cwd for user-data-dir: {err}"))
        })?;
        cwd.join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&profile_dir).map_err(|err| {
        CdpSurfaceError::Launch(format!(
            "failed to ensure user-data-dir {}: {err}",
            profile_dir.display()
        ))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.request_timeout_ms))
        .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms));

    if !cfg.headless {
        builder = builder.with_head();
    }

    if std::env::var("WEBCHAT_DISABLE_SANDBOX")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    builder = builder.args([
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-renderer-backgrounding",
        "--disable-breakpad",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-popup-blocking",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        "--remote-allow-origins=*",
        "--use-mock-keychain",
    ]);

    builder
        .chrome_executable(executable)
        .user_data_dir(profile_dir)
        .build()
        .map_err(|err| CdpSurfaceError::Launch(format!("browser config error: {err}")))
}
