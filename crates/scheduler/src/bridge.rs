use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::RequestBroker;
use crate::driver::SessionDriver;
use crate::error::BridgeError;
use crate::metrics;
use crate::model::{RequestId, ResponseSlot, SlotKind, StabilizationPolicy};
use crate::ports::AutomationSurface;
use crate::session::{SessionMonitor, SessionSnapshot};
use crate::store::ResponseStore;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplyOutcome {
    Turn(SlotKind),
    /// The caller stopped waiting; `text` is a synthesized notice.
    CallerTimeout,
}

#[derive(Clone, Debug)]
pub struct BridgeReply {
    pub id: RequestId,
    pub text: String,
    pub outcome: ReplyOutcome,
}

impl BridgeReply {
    fn from_slot(id: RequestId, slot: ResponseSlot) -> Self {
        Self {
            id,
            text: slot.text,
            outcome: ReplyOutcome::Turn(slot.kind),
        }
    }
}

pub fn caller_timeout_message(wait: Duration) -> String {
    format!("Request timeout (no reply within {}s).", wait.as_secs())
}

/// Producer-side handle shared by every HTTP handler.
#[derive(Clone)]
pub struct Bridge {
    broker: Arc<RequestBroker>,
    store: Arc<ResponseStore>,
    monitor: SessionMonitor,
    policy: StabilizationPolicy,
    shutdown: CancellationToken,
}

impl Bridge {
    /// Spawns the session driver over `surface` and returns the shared handle.
    pub fn start(
        surface: Arc<dyn AutomationSurface>,
        policy: StabilizationPolicy,
    ) -> (Self, JoinHandle<()>) {
        let broker = Arc::new(RequestBroker::new());
        let store = Arc::new(ResponseStore::new());
        let monitor = SessionMonitor::new();
        let shutdown = CancellationToken::new();

        let driver = SessionDriver::new(
            surface,
            Arc::clone(&broker),
            Arc::clone(&store),
            monitor.clone(),
            policy.clone(),
        );
        let handle = tokio::spawn(driver.run(shutdown.clone()));

        let bridge = Self {
            broker,
            store,
            monitor,
            policy,
            shutdown,
        };
        (bridge, handle)
    }

    pub fn policy(&self) -> &StabilizationPolicy {
        &self.policy
    }

    pub fn queue_depth(&self) -> usize {
        self.broker.len()
    }

    pub fn pending_slots(&self) -> usize {
        self.store.len()
    }

    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.monitor.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Queues `prompt` and waits up to `wait` for its turn to finish.
    ///
    /// A caller timeout is not an error: the turn keeps running, the slot is
    /// marked abandoned and a timeout notice is returned instead.
    pub async fn ask(&self, prompt: &str, wait: Duration) -> Result<BridgeReply, BridgeError> {
        if prompt.trim().is_empty() {
            return Err(BridgeError::EmptyPrompt);
        }

        let handle = self.broker.enqueue(prompt);
        // Checked after enqueue: a shutdown that lands in between has already
        // drained the queue and would leave this request waiting.
        if self.shutdown.is_cancelled() {
            self.broker.drain();
            return Err(BridgeError::ShutDown);
        }
        let id = handle.id;
        debug!(request_id = %id, seq = handle.seq, depth = self.broker.len(), "request queued");

        match timeout(wait, handle.completion).await {
            Ok(Ok(())) => self
                .store
                .take(&id)
                .map(|slot| BridgeReply::from_slot(id, slot))
                .ok_or(BridgeError::MissingSlot(id)),
            Ok(Err(_)) => Err(BridgeError::ShutDown),
            Err(_) => {
                metrics::record_caller_timeout();
                if let Some(slot) = self.store.abandon(&id) {
                    return Ok(BridgeReply::from_slot(id, slot));
                }
                warn!(
                    request_id = %id,
                    wait_secs = wait.as_secs(),
                    "caller timed out; turn continues without a reader"
                );
                Ok(BridgeReply {
                    id,
                    text: caller_timeout_message(wait),
                    outcome: ReplyOutcome::CallerTimeout,
                })
            }
        }
    }

    /// Periodically drops slots nobody will read.
    pub fn spawn_janitor(&self, ttl: Duration, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let pruned = store.prune_expired(ttl);
                        if pruned > 0 {
                            debug!(pruned, "expired response slots removed");
                        }
                    }
                }
            }
        })
    }

    /// Stops the driver after its current turn and releases queued callers.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let dropped = self.broker.drain();
        info!(dropped, "bridge shutting down");
    }
}
