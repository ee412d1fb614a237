//! Time sources for the reactor

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Monotonic time, measured from an arbitrary origin
pub trait Clock {
    fn now(&self) -> Duration;

    /// Block until `deadline`. Called only when there is nothing else to do.
    fn sleep_until(&self, deadline: Duration);
}

/// Wall clock time
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Virtual time that only moves when told to
///
/// Sleeping jumps straight to the deadline, so timer driven tests run
/// instantly and deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(5));
        clock.sleep_until(Duration::from_millis(3));
        assert_eq!(clock.now(), Duration::from_millis(5));

        clock.sleep_until(Duration::from_millis(12));
        assert_eq!(clock.now(), Duration::from_millis(12));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep_until(a + Duration::from_millis(1));
        assert!(clock.now() >= a + Duration::from_millis(1));
    }
}
