//! Action timers.
//!
//! The engine arms one timer per dispatched action that waits for a result.
//! How timers are driven is up to the scheduler: the tokio runtime sleeps in
//! spawned tasks, tests and the simulator advance a logical clock by hand.

use crate::action::ActionId;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::trace;

pub trait TimerScheduler {
    /// Arm (or re-arm) the timer for `action`.
    fn set_timer(&mut self, action: ActionId, after: Duration);

    /// Disarm the timer for `action`. Returns whether one was armed.
    fn cancel_timer(&mut self, action: ActionId) -> bool;
}

/// Deterministic scheduler driven by an explicit logical clock.
#[derive(Debug, Default)]
pub struct ManualTimers {
    now: Duration,
    deadlines: BTreeMap<ActionId, Duration>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn active_count(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_armed(&self, action: ActionId) -> bool {
        self.deadlines.contains_key(&action)
    }

    pub fn deadline(&self, action: ActionId) -> Option<Duration> {
        self.deadlines.get(&action).copied()
    }

    /// Move the clock forward and return the actions whose timers expired,
    /// earliest deadline first. Expired timers are disarmed.
    pub fn advance(&mut self, by: Duration) -> Vec<ActionId> {
        self.now = self.now.saturating_add(by);
        let now = self.now;
        let mut expired: Vec<(Duration, ActionId)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(&id, &deadline)| (deadline, id))
            .collect();
        expired.sort();
        for (_, id) in &expired {
            self.deadlines.remove(id);
        }
        expired.into_iter().map(|(_, id)| id).collect()
    }

    /// Jump straight to the next deadline, if any timer is armed.
    pub fn expire_next(&mut self) -> Vec<ActionId> {
        match self.deadlines.values().min().copied() {
            Some(deadline) => {
                let by = deadline.saturating_sub(self.now);
                self.advance(by)
            }
            None => Vec::new(),
        }
    }
}

impl TimerScheduler for ManualTimers {
    fn set_timer(&mut self, action: ActionId, after: Duration) {
        trace!(action = action.0, after_ms = after.as_millis() as u64, "timer armed");
        self.deadlines.insert(action, self.now.saturating_add(after));
    }

    fn cancel_timer(&mut self, action: ActionId) -> bool {
        self.deadlines.remove(&action).is_some()
    }
}
