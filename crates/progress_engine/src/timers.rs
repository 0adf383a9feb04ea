use std::time::Duration;

use tracing::debug;

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone)]
struct PendingTimer<C> {
    id: TimerId,
    due_ms: u64,
    continuation: C,
}

/// Every pending timer of one mounted scene instance. The owning scene
/// cancels the whole list when it goes inactive or unmounts, so no
/// continuation can fire for a scene the player already left.
pub struct SceneTimers<C> {
    clock: SharedClock,
    pending: Vec<PendingTimer<C>>,
    next_id: u64,
    active: bool,
}

impl<C> SceneTimers<C> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            pending: Vec::new(),
            next_id: 1,
            active: true,
        }
    }

    /// Returns `None` while inactive; nothing is queued in that case.
    pub fn schedule(&mut self, delay: Duration, continuation: C) -> Option<TimerId> {
        if !self.active {
            return None;
        }
        let id = TimerId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        let due_ms = self.clock.now_ms().saturating_add(delay.as_millis() as u64);
        self.pending.push(PendingTimer {
            id,
            due_ms,
            continuation,
        });
        Some(id)
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|timer| timer.id != id);
        before != self.pending.len()
    }

    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        if cancelled > 0 {
            debug!(cancelled, "scene_timers_cancelled");
        }
        cancelled
    }

    pub fn deactivate(&mut self) -> usize {
        self.active = false;
        self.cancel_all()
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Removes and returns the continuations whose due time has passed, in
    /// due order (ties broken by scheduling order).
    pub fn drain_due(&mut self) -> Vec<C> {
        if !self.active {
            return Vec::new();
        }
        let now_ms = self.clock.now_ms();
        let mut due = Vec::new();
        let mut idx = 0;
        while idx < self.pending.len() {
            if self.pending[idx].due_ms <= now_ms {
                due.push(self.pending.remove(idx));
            } else {
                idx += 1;
            }
        }
        due.sort_by_key(|timer| (timer.due_ms, timer.id));
        due.into_iter().map(|timer| timer.continuation).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_due_ms(&self) -> Option<u64> {
        self.pending.iter().map(|timer| timer.due_ms).min()
    }

    /// Pending continuations with their delay relative to now, in due order.
    pub fn pending(&self) -> Vec<(Duration, &C)> {
        let now_ms = self.clock.now_ms();
        let mut entries = self
            .pending
            .iter()
            .map(|timer| (timer.due_ms, timer.id, &timer.continuation))
            .collect::<Vec<_>>();
        entries.sort_by_key(|(due_ms, id, _)| (*due_ms, *id));
        entries
            .into_iter()
            .map(|(due_ms, _, continuation)| {
                (
                    Duration::from_millis(due_ms.saturating_sub(now_ms)),
                    continuation,
                )
            })
            .collect()
    }
}
