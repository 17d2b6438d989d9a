//! Deadline-based debounce timer.

use std::time::{Duration, Instant};

/// Collapses bursts of triggers into one firing after a quiet period.
///
/// Each [`schedule`](Debounce::schedule) pushes the deadline back; the
/// owner polls [`take_due`](Debounce::take_due) from its loop.
#[derive(Clone, Debug)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm (or re-arm) the timer relative to `now`.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left until the deadline, if armed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Returns true once when the deadline has passed, disarming the timer.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
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
    fn test_not_due_before_delay() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(500));

        debounce.schedule(start);
        assert!(debounce.is_pending());
        assert!(!debounce.take_due(start + Duration::from_millis(499)));
        assert!(debounce.take_due(start + Duration::from_millis(500)));
        assert!(!debounce.is_pending());
    }

    #[test]
    fn test_reschedule_pushes_deadline() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(100));

        debounce.schedule(start);
        debounce.schedule(start + Duration::from_millis(80));

        assert!(!debounce.take_due(start + Duration::from_millis(120)));
        assert!(debounce.take_due(start + Duration::from_millis(180)));
    }

    #[test]
    fn test_fires_once_for_a_burst() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(50));

        for i in 0..20 {
            debounce.schedule(start + Duration::from_millis(i));
        }

        let later = start + Duration::from_millis(200);
        assert!(debounce.take_due(later));
        assert!(!debounce.take_due(later));
    }

    #[test]
    fn test_remaining() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(100));
        assert_eq!(debounce.remaining(start), None);

        debounce.schedule(start);
        assert_eq!(
            debounce.remaining(start + Duration::from_millis(40)),
            Some(Duration::from_millis(60))
        );
        assert_eq!(
            debounce.remaining(start + Duration::from_millis(400)),
            Some(Duration::ZERO)
        );

        debounce.cancel();
        assert!(!debounce.is_pending());
    }
}
