use thiserror::Error;
use webchat_scheduler::SurfaceError;

#[derive(Debug, Error)]
pub enum CdpSurfaceError {
    #[error("invalid cdp configuration: {0}")]
    Config(String),
    #[error("chrome executable not found; set WEBCHAT_CHROME to the full path of chrome/chromium")]
    ChromeNotFound,
    #[error("failed to launch chromium: {0}")]
    Launch(String),
    #[error("failed to connect to devtools endpoint {url}: {message}")]
    Connect { url: String, message: String },
    #[error("chat page unavailable: {0}")]
    Page(String),
    #[error("{method} failed: {message}")]
    Command { method: String, message: String },
}

impl CdpSurfaceError {
    pub fn command(method: &str, err: impl ToString) -> Self {
        Self::Command {
            method: method.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<CdpSurfaceError> for SurfaceError {
    fn from(err: CdpSurfaceError) -> Self {
        match err {
            CdpSurfaceError::Command { .. } => SurfaceError::script(err.to_string()),
            CdpSurfaceError::Page(_) | CdpSurfaceError::Connect { .. } => {
                SurfaceError::unavailable(err.to_string())
            }
            other => SurfaceError::Other(other.to_string()),
        }
    }
}
