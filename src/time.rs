//! Monotonic millisecond clock used for `modified`, TTL comparisons, and
//! eviction ordering.
//!
//! All expiration and eviction math in this crate flows through a single
//! [`Clock`] so that tests can swap in a deterministic fake instead of
//! sleeping real wall-clock time (see `FakeClock` in the `#[cfg(test)]`
//! module below).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic source of "now" expressed in milliseconds.
///
/// Implementations MUST be monotonic: two calls from the same thread must
/// never observe `now()` decrease.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since some fixed, implementation-defined
    /// epoch. Only relative comparisons between calls on the same `Clock`
    /// are meaningful.
    fn now_ms(&self) -> i64;
}

/// Default clock: milliseconds elapsed since the clock was constructed,
/// backed by [`std::time::Instant`] so it is immune to wall-clock
/// adjustments (NTP steps, DST, manual clock changes).
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor: Instant,
}

impl SystemClock {
    /// Construct a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// Wrap this clock in an `Arc` for sharing across cache services.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.anchor.elapsed().as_millis() as i64
    }
}

/// A clock whose value is set explicitly, for deterministic tests of
/// expiration, eviction ordering, and touch/refresh deadline math.
#[derive(Debug)]
pub struct FakeClock {
    millis: AtomicI64,
}

impl FakeClock {
    /// Construct a fake clock starting at `start_ms`.
    pub fn new(start_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicI64::new(start_ms),
        })
    }

    /// Advance the clock by `delta_ms` milliseconds.
    pub fn advance(&self, delta_ms: i64) {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, ms: i64) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = clock.now_ms();
        assert!(b >= a);
    }

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeClock::new(100);
        assert_eq!(clock.now_ms(), 100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(0);
        assert_eq!(clock.now_ms(), 0);
    }
}
