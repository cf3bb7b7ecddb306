use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CdpSurfaceError;
use crate::locator::LocatorStrategy;

pub const DEFAULT_CHAT_URL: &str = "https://chat.deepseek.com";

/// Configuration for launching (or attaching to) the browser that hosts the chat page.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    pub chat_url: String,
    /// Attach to an already running browser instead of launching one.
    pub websocket_url: Option<String>,
    /// Browser binary; empty means look it up at launch.
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub launch_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Pause between filling the input and pressing Enter.
    pub submit_delay_ms: u64,
    pub input_locators: LocatorStrategy,
    pub reply_root_locators: LocatorStrategy,
    pub reply_fallback_locators: LocatorStrategy,
    /// Text that marks the page's greeting rather than a reply.
    pub welcome_markers: Vec<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            chat_url: DEFAULT_CHAT_URL.to_string(),
            websocket_url: None,
            executable: PathBuf::new(),
            user_data_dir: default_profile_dir(),
            headless: resolve_headless_default(),
            launch_timeout_ms: 20_000,
            request_timeout_ms: 30_000,
            submit_delay_ms: 150,
            input_locators: LocatorStrategy::default_input(),
            reply_root_locators: LocatorStrategy::default_reply_roots(),
            reply_fallback_locators: LocatorStrategy::default_reply_fallback(),
            welcome_markers: vec![
                "今天有什么可以帮".to_string(),
                "有什么可以帮".to_string(),
                "How can I help you today".to_string(),
            ],
        }
    }
}

impl CdpConfig {
    pub fn validate(&self) -> Result<(), CdpSurfaceError> {
        if self.chat_url.trim().is_empty() {
            return Err(CdpSurfaceError::Config("chat_url must not be empty".into()));
        }
        if let Some(ws) = &self.websocket_url {
            if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
                return Err(CdpSurfaceError::Config(format!(
                    "websocket_url must start with ws:// or wss:// (got {ws})"
                )));
            }
        }
        for strategy in [
            &self.input_locators,
            &self.reply_root_locators,
            &self.reply_fallback_locators,
        ] {
            strategy.validate().map_err(CdpSurfaceError::Config)?;
        }
        Ok(())
    }
}

fn resolve_headless_default() -> bool {
    // "0", "false", "no", "off" mean headful
    match env::var("WEBCHAT_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        // The chat page usually needs a manual login first.
        Err(_) => false,
    }
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("WEBCHAT_CHROME_PROFILE") {
        return PathBuf::from(path);
    }

    let default = Path::new("./.webchat-profile");
    default.into()
}
