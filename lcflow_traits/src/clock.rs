use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Time source behind the re-calibration cadence and timeout threads.
/// Implementations may substitute virtual time for real sleeps.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

/// Wall-clock implementation backed by `Instant` and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

/// Deterministic clock for tests. `sleep` jumps virtual time forward
/// without blocking, so the cadence and timeout threads run at full speed;
/// clones share one timeline.
#[derive(Debug, Clone)]
pub struct TestClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Jump the timeline forward by `d`.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        let off = self.offset.lock().map_or(Duration::ZERO, |g| *g);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_sleep_advances_a_shared_timeline() {
        let clock = TestClock::new();
        let observer = clock.clone();
        let before = observer.now();

        clock.sleep(Duration::from_millis(250));

        assert_eq!(observer.now() - before, Duration::from_millis(250));
    }

    #[test]
    fn zero_sleep_on_the_real_clock_returns_immediately() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        clock.sleep(Duration::ZERO);
        assert!(clock.now().duration_since(a) < Duration::from_millis(50));
    }
}
