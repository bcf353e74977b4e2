//! Engine timer
//!
//! Each engine owns exactly one timer. Arming it replaces any pending
//! deadline; the event loop asks how long it may block before the deadline
//! passes and fires it at most once.

use std::time::{Duration, Instant};

/// One-shot deadline timer
#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// Create a disarmed timer
    pub fn new() -> Self {
        Timer { deadline: None }
    }

    /// Arm the timer to fire `after` from now, replacing any pending deadline
    pub fn arm(&mut self, after: Duration) {
        self.arm_at(Instant::now() + after);
    }

    /// Arm the timer to fire at `deadline`
    pub fn arm_at(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Cancel the pending deadline
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left until the deadline, `None` when disarmed
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Check if the deadline has passed
    pub fn expired(&self) -> bool {
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Fire the timer if expired, disarming it; returns true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}
