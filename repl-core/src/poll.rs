//! Polling intervals.
//!
//! Doubles from an initial interval up to a ceiling. The harness sleeps for
//! each interval between probes; the overall deadline lives with the caller.

use std::time::Duration;

/// Bounded exponential backoff between polls.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    next: Duration,
    max: Duration,
}

impl PollSchedule {
    /// Start at `initial`, never exceed `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// The interval to sleep before the next probe.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }
}
