use std::time::Instant;

/// Monotonic time source for sample timestamps.
///
/// Only reads time; waiting is left to the async runtime.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Real monotonic clock backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-util"))]
mod manual {
    use super::Clock;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    /// Deterministic clock whose time only moves when told to.
    ///
    /// now() = origin + offset. Clones share the offset.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        origin: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        pub fn advance(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = off.saturating_add(d);
            }
        }

        pub fn advance_ms(&self, ms: u64) {
            self.advance(Duration::from_millis(ms));
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
            self.origin + off
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new();
        let epoch = clock.now();
        assert_eq!(clock.ms_since(epoch), 0);
        clock.advance_ms(300);
        let shared = clock.clone();
        shared.advance(Duration::from_millis(200));
        assert_eq!(clock.ms_since(epoch), 500);
    }

    #[test]
    fn ms_since_saturates_for_future_epoch() {
        let clock = ManualClock::new();
        let later = clock.now() + Duration::from_secs(5);
        assert_eq!(clock.ms_since(later), 0);
    }
}
