//! Single-session request brokering for webchat-bridge.
//!
//! Many callers enqueue prompts; one driver task owns the automation surface,
//! submits one prompt at a time and decides when the reply has settled.

pub mod bridge;
pub mod broker;
pub mod detector;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod model;
pub mod ports;
pub mod safety_net;
pub mod session;
pub mod store;

pub use bridge::{caller_timeout_message, Bridge, BridgeReply, ReplyOutcome};
pub use broker::RequestBroker;
pub use detector::{CompletionDetector, DetectorPhase, SampleVerdict, ShrinkGuard, Step};
pub use driver::{SessionDriver, TurnReport, SUBMIT_FAILED_MARKER};
pub use error::{BridgeError, SurfaceError};
pub use model::{RequestId, ResponseSlot, SlotKind, StabilizationPolicy};
pub use ports::AutomationSurface;
pub use session::{SessionMonitor, SessionSnapshot, SessionState};
pub use store::ResponseStore;
