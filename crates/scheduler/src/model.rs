use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Opaque identifier handed to each accepted request. Never reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the text in a response slot came to be written.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Sampled text held steady and the authoritative re-sample returned.
    Stabilized,
    /// The re-sample never returned; the safety net flushed the last known text.
    SafetyNet,
    /// The poll ceiling was reached before the text settled.
    StabilizationTimeout,
    /// `submit` could not deliver the prompt.
    AutomationFailure,
}

impl SlotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Stabilized => "stabilized",
            SlotKind::SafetyNet => "safety_net",
            SlotKind::StabilizationTimeout => "stabilization_timeout",
            SlotKind::AutomationFailure => "automation_failure",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, SlotKind::AutomationFailure)
    }
}

#[derive(Clone, Debug)]
pub struct ResponseSlot {
    pub text: String,
    pub kind: SlotKind,
    pub written_at: Instant,
}

/// Tuning for the completion detector. Empirical, not protocol constants.
#[derive(Clone, Debug, PartialEq)]
pub struct StabilizationPolicy {
    pub poll_interval: Duration,
    pub unchanged_threshold: u32,
    pub max_poll_count: u32,
    pub shrink_ratio: f64,
    pub shrink_slack_chars: usize,
    pub shrink_floor_chars: usize,
    pub warmup: Duration,
    pub settle: Duration,
    pub safety_net: Duration,
    pub sample_timeout: Duration,
}

impl Default for StabilizationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            unchanged_threshold: 8,
            max_poll_count: 200,
            shrink_ratio: 0.8,
            shrink_slack_chars: 100,
            shrink_floor_chars: 100,
            warmup: Duration::from_millis(1_500),
            settle: Duration::from_millis(300),
            safety_net: Duration::from_secs(8),
            sample_timeout: Duration::from_secs(5),
        }
    }
}

impl StabilizationPolicy {
    /// Upper bound on how long one turn can occupy the session once submitted.
    pub fn worst_case_turn(&self) -> Duration {
        self.warmup
            + self.poll_interval * self.max_poll_count
            + self.sample_timeout
            + self.safety_net
    }
}

#[derive(Clone, Debug)]
pub struct RequestTimeline {
    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl Default for RequestTimeline {
    fn default() -> Self {
        Self {
            enqueued_at: Instant::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

impl RequestTimeline {
    pub fn queue_wait(&self) -> Duration {
        self.started_at
            .map(|start| start.duration_since(self.enqueued_at))
            .unwrap_or_default()
    }

    pub fn run_time(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(finish)) => finish.duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

/// A prompt waiting for (or holding) the session.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub seq: u64,
    pub prompt: String,
    pub timeline: RequestTimeline,
    completion: Option<oneshot::Sender<()>>,
}

impl PendingRequest {
    pub(crate) fn new(seq: u64, prompt: String, completion: oneshot::Sender<()>) -> Self {
        Self {
            id: RequestId::new(),
            seq,
            prompt,
            timeline: RequestTimeline::default(),
            completion: Some(completion),
        }
    }

    pub fn submitted_at(&self) -> Instant {
        self.timeline.enqueued_at
    }

    /// Fires the caller's completion signal. Returns false if it already fired.
    pub fn signal_completion(&mut self) -> bool {
        match self.completion.take() {
            Some(tx) => {
                // The caller may have stopped waiting; that is not an error here.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// Caller side of an enqueued request.
#[derive(Debug)]
pub struct TurnHandle {
    pub id: RequestId,
    pub seq: u64,
    pub completion: oneshot::Receiver<()>,
}
