//! Deadline-based countdown timers owned by the tracker dispatch loop.
//!
//! A countdown is armed with `reset`, disarmed with `cancel`, and
//! fires at most once per arming: `take_due` clears the deadline as it
//! reports it. All three operations happen on the dispatch thread, so
//! a cancelled countdown can never slip through and fire its effect.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Countdown {
    fire_at: Option<Instant>,
}

impl Countdown {
    pub fn new() -> Self {
        Self { fire_at: None }
    }

    /// Arms the countdown, replacing any pending deadline.
    pub fn reset(&mut self, now: Instant, delay: Duration) {
        self.fire_at = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.fire_at = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.fire_at
    }

    /// Reports and clears a due deadline. Returns false when unarmed
    /// or not yet due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.fire_at {
            Some(at) if at <= now => {
                self.fire_at = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmed_countdown_is_never_due() {
        let mut countdown = Countdown::new();
        assert!(!countdown.take_due(Instant::now()));
        assert!(countdown.deadline().is_none());
    }

    #[test]
    fn fires_once_when_due() {
        let now = Instant::now();
        let mut countdown = Countdown::new();
        countdown.reset(now, Duration::from_secs(3));

        assert!(!countdown.take_due(now + Duration::from_secs(2)));
        assert!(countdown.take_due(now + Duration::from_secs(3)));
        assert!(!countdown.take_due(now + Duration::from_secs(10)));
    }

    #[test]
    fn reset_replaces_pending_deadline() {
        let now = Instant::now();
        let mut countdown = Countdown::new();
        countdown.reset(now, Duration::from_secs(3));
        countdown.reset(now + Duration::from_secs(2), Duration::from_secs(3));

        assert!(!countdown.take_due(now + Duration::from_secs(4)));
        assert!(countdown.take_due(now + Duration::from_secs(5)));
    }

    #[test]
    fn cancelled_countdown_never_fires() {
        let now = Instant::now();
        let mut countdown = Countdown::new();
        countdown.reset(now, Duration::from_secs(3));
        countdown.cancel();

        assert!(!countdown.take_due(now + Duration::from_secs(60)));
    }
}
