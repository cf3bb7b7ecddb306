//! Service configuration.
//!
//! Loaded from YAML (`--config` or `<config_dir>/webchat-bridge/config.yaml`),
//! then environment overrides, then CLI flags. Missing sections keep their
//! defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};
use webchat_cdp::CdpConfig;
use webchat_scheduler::StabilizationPolicy;

pub const APP_DIR: &str = "webchat-bridge";
pub const DEFAULT_PORT: u16 = 8765;

pub const PORT_ENV: &str = "WEBCHAT_BRIDGE_PORT";
pub const CHAT_URL_ENV: &str = "WEBCHAT_BRIDGE_CHAT_URL";
pub const WS_URL_ENV: &str = "WEBCHAT_BRIDGE_WS_URL";
pub const FIXTURE_ENV: &str = "WEBCHAT_BRIDGE_FIXTURE";
pub const HEADLESS_ENV: &str = "WEBCHAT_HEADLESS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server config: {0}")]
    Server(String),
    #[error("invalid stabilization config: {0}")]
    Stabilization(String),
    #[error("invalid browser config: {0}")]
    Browser(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub stabilization: StabilizationConfig,
    pub browser: CdpConfig,
    /// Serve canned replies from this JSON file instead of driving a browser.
    pub fixture: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long one HTTP caller waits for its turn before getting a timeout notice.
    pub caller_timeout_secs: u64,
    pub response_ttl_secs: u64,
    pub janitor_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            caller_timeout_secs: 180,
            response_ttl_secs: 600,
            janitor_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn caller_timeout(&self) -> Duration {
        Duration::from_secs(self.caller_timeout_secs)
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }
}

/// YAML-friendly mirror of [`StabilizationPolicy`] with millisecond fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizationConfig {
    pub poll_interval_ms: u64,
    pub unchanged_threshold: u32,
    pub max_poll_count: u32,
    pub shrink_ratio: f64,
    pub shrink_slack_chars: usize,
    pub shrink_floor_chars: usize,
    pub warmup_ms: u64,
    pub settle_ms: u64,
    pub safety_net_ms: u64,
    pub sample_timeout_ms: u64,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self::from_policy(&StabilizationPolicy::default())
    }
}

impl StabilizationConfig {
    pub fn from_policy(policy: &StabilizationPolicy) -> Self {
        Self {
            poll_interval_ms: policy.poll_interval.as_millis() as u64,
            unchanged_threshold: policy.unchanged_threshold,
            max_poll_count: policy.max_poll_count,
            shrink_ratio: policy.shrink_ratio,
            shrink_slack_chars: policy.shrink_slack_chars,
            shrink_floor_chars: policy.shrink_floor_chars,
            warmup_ms: policy.warmup.as_millis() as u64,
            settle_ms: policy.settle.as_millis() as u64,
            safety_net_ms: policy.safety_net.as_millis() as u64,
            sample_timeout_ms: policy.sample_timeout.as_millis() as u64,
        }
    }

    pub fn to_policy(&self) -> StabilizationPolicy {
        StabilizationPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            unchanged_threshold: self.unchanged_threshold,
            max_poll_count: self.max_poll_count,
            shrink_ratio: self.shrink_ratio,
            shrink_slack_chars: self.shrink_slack_chars,
            shrink_floor_chars: self.shrink_floor_chars,
            warmup: Duration::from_millis(self.warmup_ms),
            settle: Duration::from_millis(self.settle_ms),
            safety_net: Duration::from_millis(self.safety_net_ms),
            sample_timeout: Duration::from_millis(self.sample_timeout_ms),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Stabilization(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.unchanged_threshold == 0 {
            return Err(ConfigError::Stabilization(
                "unchanged_threshold must be at least 1".into(),
            ));
        }
        if self.max_poll_count < self.unchanged_threshold {
            return Err(ConfigError::Stabilization(format!(
                "max_poll_count ({}) must not be below unchanged_threshold ({})",
                self.max_poll_count, self.unchanged_threshold
            )));
        }
        if !(self.shrink_ratio > 0.0 && self.shrink_ratio <= 1.0) {
            return Err(ConfigError::Stabilization(format!(
                "shrink_ratio must be in (0, 1], got {}",
                self.shrink_ratio
            )));
        }
        if self.safety_net_ms == 0 || self.sample_timeout_ms == 0 {
            return Err(ConfigError::Stabilization(
                "safety_net_ms and sample_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl BridgeConfig {
    pub fn policy(&self) -> StabilizationPolicy {
        self.stabilization.to_policy()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Server("host must not be empty".into()));
        }
        if self.server.caller_timeout_secs == 0 {
            return Err(ConfigError::Server(
                "caller_timeout_secs must be greater than zero".into(),
            ));
        }
        self.stabilization.validate()?;

        // Callers must outlast the detector ceiling.
        let policy = self.policy();
        let ceiling = policy.warmup + policy.poll_interval * policy.max_poll_count;
        if self.server.caller_timeout() <= ceiling {
            return Err(ConfigError::Server(format!(
                "caller_timeout_secs ({}) must exceed the stabilization ceiling ({}s)",
                self.server.caller_timeout_secs,
                ceiling.as_secs_f64()
            )));
        }
        if self.server.response_ttl() < self.server.caller_timeout() {
            warn!(
                ttl_secs = self.server.response_ttl_secs,
                caller_timeout_secs = self.server.caller_timeout_secs,
                "response_ttl_secs is shorter than caller_timeout_secs"
            );
        }

        if self.fixture.is_none() {
            self.browser
                .validate()
                .map_err(|err| ConfigError::Browser(err.to_string()))?;
        }
        Ok(())
    }

    /// Applies `WEBCHAT_BRIDGE_*` and `WEBCHAT_HEADLESS` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(raw) = env_value(PORT_ENV) {
            match raw.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(err) => warn!(?err, value = %raw, "ignoring invalid {}", PORT_ENV),
            }
        }
        if let Some(url) = env_value(CHAT_URL_ENV) {
            self.browser.chat_url = url;
        }
        if let Some(ws) = env_value(WS_URL_ENV) {
            self.browser.websocket_url = Some(ws);
        }
        if let Some(path) = env_value(FIXTURE_ENV) {
            self.fixture = Some(PathBuf::from(path));
        }
        if let Some(raw) = env_value(HEADLESS_ENV) {
            self.browser.headless = !matches!(
                raw.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push(APP_DIR);
    path.push("config.yaml");
    Ok(path)
}

/// Reads the YAML file (defaults when it does not exist) and applies env overrides.
pub async fn load_config(config_path: Option<&Path>) -> Result<(BridgeConfig, PathBuf)> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    let mut config = if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: BridgeConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
        info!("Loaded configuration from: {}", config_path.display());
        config
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        BridgeConfig::default()
    };

    config.apply_env_overrides();
    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OVERRIDE_VARS: [&str; 5] = [PORT_ENV, CHAT_URL_ENV, WS_URL_ENV, FIXTURE_ENV, HEADLESS_ENV];

    fn clear_overrides() -> Vec<(&'static str, Option<String>)> {
        OVERRIDE_VARS
            .iter()
            .map(|name| {
                let saved = (*name, env::var(name).ok());
                env::remove_var(name);
                saved
            })
            .collect()
    }

    fn restore(saved: Vec<(&'static str, Option<String>)>) {
        for (name, value) in saved {
            match value {
                Some(value) => env::set_var(name, value),
                None => env::remove_var(name),
            }
        }
    }

    #[test]
    fn defaults_validate() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.policy(), StabilizationPolicy::default());
        config.validate().expect("defaults are valid");
    }

    #[tokio::test]
    #[serial]
    async fn partial_yaml_keeps_defaults() {
        let saved = clear_overrides();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 9000\nstabilization:\n  unchanged_threshold: 3\nbrowser:\n  chat_url: https://chat.example.com"
        )
        .unwrap();

        let (config, path) = load_config(Some(file.path())).await.unwrap();
        restore(saved);

        assert_eq!(path, file.path());
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.caller_timeout_secs, 180);
        assert_eq!(config.stabilization.unchanged_threshold, 3);
        assert_eq!(config.stabilization.poll_interval_ms, 500);
        assert_eq!(config.browser.chat_url, "https://chat.example.com");
        assert!(config.fixture.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn missing_file_uses_defaults() {
        let saved = clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        let (config, _) = load_config(Some(missing.as_path())).await.unwrap();
        restore(saved);
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[tokio::test]
    #[serial]
    async fn malformed_yaml_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server: [not, a, map").unwrap();
        assert!(load_config(Some(file.path())).await.is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_win_over_file_values() {
        let saved = clear_overrides();
        env::set_var(PORT_ENV, "9911");
        env::set_var(CHAT_URL_ENV, "https://chat.example.org");
        env::set_var(WS_URL_ENV, "ws://127.0.0.1:9222/devtools/browser/x");
        env::set_var(HEADLESS_ENV, "off");

        let mut config = BridgeConfig::default();
        config.server.port = 1234;
        config.browser.headless = true;
        config.apply_env_overrides();
        restore(saved);

        assert_eq!(config.server.port, 9911);
        assert_eq!(config.browser.chat_url, "https://chat.example.org");
        assert_eq!(
            config.browser.websocket_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/x")
        );
        assert!(!config.browser.headless);
    }

    #[test]
    #[serial]
    fn invalid_port_env_is_ignored() {
        let saved = clear_overrides();
        env::set_var(PORT_ENV, "not-a-port");
        let mut config = BridgeConfig::default();
        config.apply_env_overrides();
        restore(saved);
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[test]
    fn caller_timeout_must_outlast_detector() {
        let mut config = BridgeConfig::default();
        config.server.caller_timeout_secs = 60;
        assert!(matches!(config.validate(), Err(ConfigError::Server(_))));
    }

    #[test]
    fn rejects_bad_stabilization_values() {
        let mut config = BridgeConfig::default();
        config.stabilization.shrink_ratio = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Stabilization(_))
        ));

        let mut config = BridgeConfig::default();
        config.stabilization.max_poll_count = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Stabilization(_))
        ));
    }

    #[test]
    fn fixture_mode_skips_browser_validation() {
        let mut config = BridgeConfig::default();
        config.browser.chat_url = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Browser(_))));
        config.fixture = Some(PathBuf::from("replies.json"));
        config.validate().expect("browser config unused in fixture mode");
    }
}
