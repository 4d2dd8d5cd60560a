//! Reconnect delay schedule.
//!
//! delay(attempt) = min(initial * 2^attempt, max) + U[0, jitter)
//!
//! The jitter keeps a fleet of clients from reconnecting in lockstep after a
//! backend restart.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Exclusive upper bound of the random term. Zero disables jitter.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
            jitter: Duration::from_millis(1_000),
        }
    }
}

impl BackoffPolicy {
    /// Deterministic part of the delay. Non-decreasing in `attempt` and never
    /// above `max`; saturates instead of overflowing for large attempts.
    pub fn floor(&self, attempt: u32) -> Duration {
        let initial_ms = duration_ms(self.initial);
        let max_ms = duration_ms(self.max);
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay before reconnect number `attempt` (0-based), jittered.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut fastrand::Rng::new())
    }

    /// Same as `next_delay` with a caller-owned generator (seedable in tests).
    pub fn next_delay_with(&self, attempt: u32, rng: &mut fastrand::Rng) -> Duration {
        let jitter_ms = duration_ms(self.jitter);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rng.u64(0..jitter_ms)
        };
        self.floor(attempt) + Duration::from_millis(extra)
    }
}

#[inline]
fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_doubles_then_caps() {
        let p = BackoffPolicy::default();
        let ms: Vec<u128> = (0..7).map(|a| p.floor(a).as_millis()).collect();
        assert_eq!(ms, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let p = BackoffPolicy::default();
        assert_eq!(p.floor(63), Duration::from_millis(30_000));
        assert_eq!(p.floor(64), Duration::from_millis(30_000));
        assert_eq!(p.floor(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let p = BackoffPolicy {
            jitter: Duration::ZERO,
            ..BackoffPolicy::default()
        };
        let mut rng = fastrand::Rng::with_seed(7);
        assert_eq!(p.next_delay_with(2, &mut rng), Duration::from_millis(4_000));
    }
}
