use std::sync::Arc;
use std::time::Instant;

use tokio::time::{interval_at, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::RequestBroker;
use crate::detector::{CompletionDetector, Step};
use crate::metrics;
use crate::model::{PendingRequest, RequestId, SlotKind, StabilizationPolicy};
use crate::ports::AutomationSurface;
use crate::safety_net::{NetOutcome, SafetyNet};
use crate::session::{SessionMonitor, SessionState};
use crate::store::ResponseStore;

pub const SUBMIT_FAILED_MARKER: &str =
    "Could not deliver the prompt: no chat input was found on the page. Check that the chat page is open and logged in.";

/// What one turn produced, as seen by the driver.
#[derive(Clone, Debug)]
pub struct TurnReport {
    pub id: RequestId,
    pub kind: SlotKind,
    pub chars: usize,
    pub polls: u32,
    /// False when the caller had already given up and the reply was dropped.
    pub delivered: bool,
}

/// The only consumer of the broker and the only owner of the surface.
pub struct SessionDriver {
    surface: Arc<dyn AutomationSurface>,
    broker: Arc<RequestBroker>,
    store: Arc<ResponseStore>,
    monitor: SessionMonitor,
    policy: StabilizationPolicy,
    safety_net: SafetyNet,
    state: SessionState,
}

impl SessionDriver {
    pub fn new(
        surface: Arc<dyn AutomationSurface>,
        broker: Arc<RequestBroker>,
        store: Arc<ResponseStore>,
        monitor: SessionMonitor,
        policy: StabilizationPolicy,
    ) -> Self {
        let safety_net = SafetyNet::new(policy.safety_net);
        Self {
            surface,
            broker,
            store,
            monitor,
            policy,
            safety_net,
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(surface = self.surface.name(), "session driver started");
        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.broker.next() => request,
            };
            self.run_turn(request).await;
        }
        info!("session driver stopped");
    }

    pub async fn run_turn(&mut self, mut request: PendingRequest) -> TurnReport {
        request.timeline.started_at = Some(Instant::now());
        self.state.begin(request.id);
        self.monitor.mark_busy(request.id);
        metrics::record_started(self.broker.len());
        debug!(
            request_id = %request.id,
            seq = request.seq,
            queue_wait_ms = request.timeline.queue_wait().as_millis() as u64,
            "turn started"
        );

        let (text, kind) = self.drive(&request).await;
        let chars = text.chars().count();

        // Slot first, then the signal: a woken caller must find its reply.
        let delivered = self.store.write(request.id, text, kind);
        if !delivered {
            debug!(request_id = %request.id, "caller no longer waiting; reply dropped");
        }
        request.signal_completion();
        request.timeline.finished_at = Some(Instant::now());

        let polls = self.state.total_poll_count;
        self.state.release();
        self.monitor.mark_idle(kind);
        metrics::record_completed(kind, request.timeline.run_time());
        info!(
            request_id = %request.id,
            outcome = kind.as_str(),
            polls,
            chars,
            run_ms = request.timeline.run_time().as_millis() as u64,
            "turn finished"
        );

        TurnReport {
            id: request.id,
            kind,
            chars,
            polls,
            delivered,
        }
    }

    async fn drive(&mut self, request: &PendingRequest) -> (String, SlotKind) {
        match self.surface.submit(&request.prompt).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(request_id = %request.id, "no chat input found; turn failed");
                return (SUBMIT_FAILED_MARKER.to_string(), SlotKind::AutomationFailure);
            }
            Err(err) => {
                warn!(request_id = %request.id, error = %err, "submit failed; turn failed");
                return (
                    format!("Could not deliver the prompt: {err}"),
                    SlotKind::AutomationFailure,
                );
            }
        }

        sleep(self.policy.warmup).await;

        let mut detector = CompletionDetector::new(&request.prompt, &self.policy);
        let period = self.policy.poll_interval;
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            metrics::record_poll_tick();
            let sample = self.sample().await;
            match detector.observe(&mut self.state, sample.as_deref()) {
                Step::Continue(_) => {}
                Step::Finalize => return self.finalize(&mut detector, request.id).await,
                Step::TimedOut | Step::Finished => {
                    warn!(
                        request_id = %request.id,
                        polls = self.state.total_poll_count,
                        "reply never settled; flushing last observed text"
                    );
                    return (
                        self.state.last_observed_text.clone(),
                        SlotKind::StabilizationTimeout,
                    );
                }
            }
        }
    }

    async fn sample(&self) -> Option<String> {
        match timeout(self.policy.sample_timeout, self.surface.sample_reply()).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(err)) => {
                debug!(error = %err, "reply sample failed");
                None
            }
            Err(_) => {
                debug!("reply sample timed out");
                None
            }
        }
    }

    async fn finalize(
        &mut self,
        detector: &mut CompletionDetector,
        id: RequestId,
    ) -> (String, SlotKind) {
        let net = self.safety_net.arm();
        let settle = self.policy.settle;
        let surface = Arc::clone(&self.surface);
        let resample = async move {
            sleep(settle).await;
            surface.sample_reply().await
        };

        match net.guard(resample).await {
            NetOutcome::Completed(result) => {
                let resample = match result {
                    Ok(text) => Some(text),
                    Err(err) => {
                        debug!(request_id = %id, error = %err, "final re-sample failed");
                        None
                    }
                };
                let text = detector.finalize(&self.state, resample.as_deref());
                (text, SlotKind::Stabilized)
            }
            NetOutcome::Fired => {
                warn!(
                    request_id = %id,
                    window_ms = self.safety_net.window().as_millis() as u64,
                    "final re-sample did not return; safety net flushed last observed text"
                );
                detector.force_done();
                (self.state.last_observed_text.clone(), SlotKind::SafetyNet)
            }
        }
    }
}
