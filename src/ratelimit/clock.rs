//! Timestamp sources for window scoring.
//!
//! Window entries are scored with microsecond [`Timestamp`]s. [`SystemClock`]
//! reads wall-clock time (needed so several processes agree on window bounds)
//! and never hands out the same or an earlier value twice within a process.
//! If the wall clock steps backwards, timestamps advance by one microsecond
//! per call until wall time catches up again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

/// Microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// The start of a window of length `period` ending at `self`.
    pub fn window_start(&self, period: Duration) -> Timestamp {
        let period = u64::try_from(period.as_micros()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_sub(period))
    }

    pub fn saturating_add(&self, duration: Duration) -> Timestamp {
        let duration = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(duration))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / 1_000_000, self.0 % 1_000_000)
    }
}

/// Source of window timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time, strictly increasing within one process.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);

        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Timestamp(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<u64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start.as_micros()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = Timestamp(*now).saturating_add(by).as_micros();
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to.as_micros();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(*self.now.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_strictly_increases() {
        let clock = SystemClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_system_clock_survives_backward_jump() {
        let clock = SystemClock::new();
        // Pretend an earlier call saw a time far in the future.
        let future = clock.now().saturating_add(Duration::from_secs(3600));
        clock.last.store(future.as_micros(), Ordering::Release);

        let next = clock.now();
        assert_eq!(next.as_micros(), future.as_micros() + 1);
    }

    #[test]
    fn test_window_start() {
        let now = Timestamp::from_micros(10_000_000);
        assert_eq!(
            now.window_start(Duration::from_secs(4)),
            Timestamp::from_micros(6_000_000)
        );
        assert_eq!(
            now.window_start(Duration::from_secs(60)),
            Timestamp::from_micros(0)
        );
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(Timestamp::from_micros(1_000));
        assert_eq!(clock.now(), Timestamp::from_micros(1_000));
        clock.advance(Duration::from_millis(2));
        assert_eq!(clock.now(), Timestamp::from_micros(3_000));
        clock.set(Timestamp::from_micros(5));
        assert_eq!(clock.now(), Timestamp::from_micros(5));
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::from_micros(12_000_345).to_string(), "12.000345");
    }
}
