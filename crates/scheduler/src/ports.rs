use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SurfaceError;

/// The single live chat session, driven like a user would drive it.
///
/// Implementations have no completion signal of their own: `submit` only says
/// whether the prompt was accepted, and `sample_reply` returns whatever reply
/// text is visible right now (possibly empty or half rendered).
#[async_trait]
pub trait AutomationSurface: Send + Sync {
    /// Inject `prompt` and trigger send. `Ok(false)` means no input was found.
    async fn submit(&self, prompt: &str) -> Result<bool, SurfaceError>;

    /// Best-effort read of the latest assistant reply.
    async fn sample_reply(&self) -> Result<String, SurfaceError>;

    fn name(&self) -> &str {
        "surface"
    }
}

#[async_trait]
impl<S> AutomationSurface for Arc<S>
where
    S: AutomationSurface + ?Sized,
{
    async fn submit(&self, prompt: &str) -> Result<bool, SurfaceError> {
        (**self).submit(prompt).await
    }

    async fn sample_reply(&self) -> Result<String, SurfaceError> {
        (**self).sample_reply().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
