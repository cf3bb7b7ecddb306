use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::model::{RequestId, SlotKind};

/// Mutable state of the one live session. Owned and written by the driver only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub busy: bool,
    pub active_request_id: Option<RequestId>,
    pub last_observed_text: String,
    pub unchanged_poll_count: u32,
    pub total_poll_count: u32,
}

impl SessionState {
    pub fn begin(&mut self, id: RequestId) {
        self.busy = true;
        self.active_request_id = Some(id);
        self.last_observed_text.clear();
        self.unchanged_poll_count = 0;
        self.total_poll_count = 0;
    }

    pub fn release(&mut self) {
        self.busy = false;
        self.active_request_id = None;
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionSnapshot {
    pub busy: bool,
    pub active_request_id: Option<RequestId>,
    pub turns_completed: u64,
    pub last_outcome: Option<SlotKind>,
}

/// Read-only view of the session published by the driver.
#[derive(Clone, Debug, Default)]
pub struct SessionMonitor {
    inner: Arc<RwLock<SessionSnapshot>>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.read().busy
    }

    pub(crate) fn mark_busy(&self, id: RequestId) {
        let mut guard = self.inner.write();
        guard.busy = true;
        guard.active_request_id = Some(id);
    }

    pub(crate) fn mark_idle(&self, outcome: SlotKind) {
        let mut guard = self.inner.write();
        guard.busy = false;
        guard.active_request_id = None;
        guard.turns_completed += 1;
        guard.last_outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_resets_per_turn_counters() {
        let mut state = SessionState {
            busy: false,
            active_request_id: None,
            last_observed_text: "previous reply".into(),
            unchanged_poll_count: 7,
            total_poll_count: 120,
        };
        let id = RequestId::new();
        state.begin(id);

        assert!(state.busy);
        assert_eq!(state.active_request_id, Some(id));
        assert!(state.last_observed_text.is_empty());
        assert_eq!(state.unchanged_poll_count, 0);
        assert_eq!(state.total_poll_count, 0);

        state.release();
        assert!(!state.busy);
        assert!(state.active_request_id.is_none());
    }

    #[test]
    fn monitor_tracks_completed_turns() {
        let monitor = SessionMonitor::new();
        let id = RequestId::new();
        monitor.mark_busy(id);
        assert!(monitor.is_busy());

        monitor.mark_idle(SlotKind::Stabilized);
        let snapshot = monitor.snapshot();
        assert!(!snapshot.busy);
        assert_eq!(snapshot.turns_completed, 1);
        assert_eq!(snapshot.last_outcome, Some(SlotKind::Stabilized));
    }
}
