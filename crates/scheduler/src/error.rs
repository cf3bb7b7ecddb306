use thiserror::Error;

use crate::model::RequestId;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("bridge is shut down")]
    ShutDown,
    #[error("completion signalled for {0} but no response slot was written")]
    MissingSlot(RequestId),
}

/// Failure reported by an automation surface. The driver never propagates
/// these; they are logged and folded into the turn outcome.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("automation surface unavailable: {0}")]
    Unavailable(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("automation surface error: {0}")]
    Other(String),
}

impl SurfaceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::Script(message.into())
    }
}
