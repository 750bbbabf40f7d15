use std::time::{Duration, Instant};

/// Spaces out connection attempts so a run never emits a burst of SYNs.
///
/// The pacer only keeps time; the race engine services in-flight sockets
/// while it waits for the next slot.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    last_start: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_start: None,
        }
    }

    /// Earliest instant the next attempt may start, or `None` if it may
    /// start right away.
    pub fn next_slot(&self) -> Option<Instant> {
        if self.delay.is_zero() {
            return None;
        }
        self.last_start.map(|last| last + self.delay)
    }

    /// Time still to wait before the next attempt, measured from `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_slot()
            .map(|slot| slot.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    pub fn mark(&mut self, started: Instant) {
        self.last_start = Some(started);
    }

    pub fn reset(&mut self) {
        self.last_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_never_delayed() {
        let pacer = Pacer::new(Duration::from_millis(25));
        assert_eq!(pacer.next_slot(), None);
        assert_eq!(pacer.remaining(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn slot_follows_previous_start() {
        let mut pacer = Pacer::new(Duration::from_millis(25));
        let t0 = Instant::now();
        pacer.mark(t0);
        assert_eq!(pacer.next_slot(), Some(t0 + Duration::from_millis(25)));
        assert_eq!(pacer.remaining(t0 + Duration::from_millis(10)), Duration::from_millis(15));
        assert_eq!(pacer.remaining(t0 + Duration::from_millis(40)), Duration::ZERO);
        pacer.reset();
        assert_eq!(pacer.next_slot(), None);
    }

    #[test]
    fn zero_delay_disables_pacing() {
        let mut pacer = Pacer::new(Duration::ZERO);
        pacer.mark(Instant::now());
        assert_eq!(pacer.next_slot(), None);
    }
}
