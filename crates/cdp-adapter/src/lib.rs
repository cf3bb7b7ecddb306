//! Chromium DevTools Protocol implementation of the chat automation surface.
//!
//! The surface types into the page's chat input, presses Enter through CDP and
//! reads the last assistant message back out of the DOM. Element lookup is
//! driven by ordered locator strategies so a site redesign only needs config.

use std::env;
use std::path::PathBuf;

use which::which;

pub mod config;
pub mod error;
pub mod locator;
pub mod metrics;
pub mod scripts;
pub mod surface;

pub use config::{CdpConfig, DEFAULT_CHAT_URL};
pub use error::CdpSurfaceError;
pub use locator::LocatorStrategy;
pub use surface::CdpSurface;

pub(crate) const CHROME_ENV: &str = "WEBCHAT_CHROME";

/// Where the browser binary was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChromeSource {
    Config,
    Env,
    SearchPath,
    InstallDir,
}

/// First existing binary among `browser.executable`, `WEBCHAT_CHROME`, the
/// `PATH` and the platform's install directories.
pub fn resolve_chrome_path(cfg: &CdpConfig) -> Option<(PathBuf, ChromeSource)> {
    let configured = non_empty(cfg.executable.clone()).map(|path| (path, ChromeSource::Config));
    let from_env = env::var(CHROME_ENV)
        .ok()
        .and_then(|raw| non_empty(PathBuf::from(raw.trim())))
        .map(|path| (path, ChromeSource::Env));
    let on_path = CHROME_BINARIES
        .iter()
        .filter_map(|name| which(name).ok())
        .map(|path| (path, ChromeSource::SearchPath));
    let installed = install_dirs()
        .into_iter()
        .map(|path| (path, ChromeSource::InstallDir));

    configured
        .into_iter()
        .chain(from_env)
        .filter(|(path, _)| path.is_file())
        .chain(on_path)
        .chain(installed.filter(|(path, _)| path.is_file()))
        .next()
}

fn non_empty(path: PathBuf) -> Option<PathBuf> {
    Some(path).filter(|path| !path.as_os_str().is_empty())
}

#[cfg(target_os = "windows")]
const CHROME_BINARIES: &[&str] = &["chrome.exe", "chromium.exe", "msedge.exe"];
#[cfg(not(target_os = "windows"))]
const CHROME_BINARIES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
];

#[cfg(target_os = "windows")]
fn install_dirs() -> Vec<PathBuf> {
    ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
        .into_iter()
        .filter_map(|key| env::var(key).ok())
        .map(|root| PathBuf::from(root.trim()))
        .flat_map(|root| {
            [
                root.join("Google/Chrome/Application/chrome.exe"),
                root.join("Microsoft/Edge/Application/msedge.exe"),
            ]
        })
        .collect()
}

#[cfg(target_os = "macos")]
fn install_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
    ]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn install_dirs() -> Vec<PathBuf> {
    [
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium-browser",
        "/usr/bin/chromium",
        "/snap/bin/chromium",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::{resolve_chrome_path, ChromeSource, CHROME_ENV};
    use crate::CdpConfig;
    use serial_test::serial;
    use std::path::PathBuf;
    use std::{env, fs};
    use tempfile::tempdir;

    fn with_chrome_env<T>(value: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let saved = env::var(CHROME_ENV).ok();
        env::set_var(CHROME_ENV, value);
        let out = f();
        match saved {
            Some(saved) => env::set_var(CHROME_ENV, saved),
            None => env::remove_var(CHROME_ENV),
        }
        out
    }

    #[test]
    #[serial]
    fn configured_binary_beats_env_override() {
        let dir = tempdir().unwrap();
        let pinned = dir.path().join("pinned-chrome");
        let from_env = dir.path().join("env-chrome");
        fs::write(&pinned, b"").unwrap();
        fs::write(&from_env, b"").unwrap();

        let cfg = CdpConfig {
            executable: pinned.clone(),
            ..CdpConfig::default()
        };
        let found = with_chrome_env(&from_env, || resolve_chrome_path(&cfg));
        assert_eq!(found, Some((pinned, ChromeSource::Config)));
    }

    #[test]
    #[serial]
    fn missing_configured_binary_falls_through_to_env() {
        let dir = tempdir().unwrap();
        let from_env = dir.path().join("env-chrome");
        fs::write(&from_env, b"").unwrap();

        let cfg = CdpConfig {
            executable: PathBuf::from("/nonexistent/webchat/chrome"),
            ..CdpConfig::default()
        };
        let found = with_chrome_env(&from_env, || resolve_chrome_path(&cfg));
        assert_eq!(found, Some((from_env, ChromeSource::Env)));
    }
}
