use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::model::{RequestId, ResponseSlot, SlotKind};

#[derive(Debug)]
enum SlotEntry {
    Filled(ResponseSlot),
    /// The caller gave up waiting; a late write is discarded.
    Abandoned(Instant),
}

impl SlotEntry {
    fn touched_at(&self) -> Instant {
        match self {
            SlotEntry::Filled(slot) => slot.written_at,
            SlotEntry::Abandoned(at) => *at,
        }
    }
}

/// Final replies keyed by request id: written once, taken once.
///
/// Every operation goes through a single map entry so write, take and abandon
/// are atomic per request id.
#[derive(Debug, Default)]
pub struct ResponseStore {
    slots: DashMap<RequestId, SlotEntry>,
}

impl ResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the slot was already written or its caller is gone.
    pub fn write(&self, id: RequestId, text: impl Into<String>, kind: SlotKind) -> bool {
        match self.slots.entry(id) {
            Entry::Vacant(vacant) => {
                vacant.insert(SlotEntry::Filled(ResponseSlot {
                    text: text.into(),
                    kind,
                    written_at: Instant::now(),
                }));
                true
            }
            Entry::Occupied(occupied) => {
                if matches!(occupied.get(), SlotEntry::Abandoned(_)) {
                    occupied.remove();
                }
                false
            }
        }
    }

    pub fn take(&self, id: &RequestId) -> Option<ResponseSlot> {
        match self.slots.entry(*id) {
            Entry::Occupied(occupied) if matches!(occupied.get(), SlotEntry::Filled(_)) => {
                match occupied.remove() {
                    SlotEntry::Filled(slot) => Some(slot),
                    SlotEntry::Abandoned(_) => None,
                }
            }
            _ => None,
        }
    }

    /// Marks the caller as gone. If the reply landed in the meantime it is
    /// handed back instead.
    pub fn abandon(&self, id: &RequestId) -> Option<ResponseSlot> {
        match self.slots.entry(*id) {
            Entry::Vacant(vacant) => {
                vacant.insert(SlotEntry::Abandoned(Instant::now()));
                None
            }
            Entry::Occupied(occupied) => match occupied.get() {
                SlotEntry::Filled(_) => match occupied.remove() {
                    SlotEntry::Filled(slot) => Some(slot),
                    SlotEntry::Abandoned(_) => None,
                },
                SlotEntry::Abandoned(_) => None,
            },
        }
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        matches!(
            self.slots.get(id).as_deref(),
            Some(SlotEntry::Filled(_))
        )
    }

    /// Removes filled or abandoned slots older than `ttl`.
    pub fn prune_expired(&self, ttl: Duration) -> usize {
        if ttl.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let before = self.slots.len();
        self.slots
            .retain(|_, entry| now.duration_since(entry.touched_at()) < ttl);
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
