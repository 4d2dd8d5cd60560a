use std::time::Duration;

use bascula_core::BackoffPolicy;
use proptest::prelude::*;
use rstest::rstest;

#[rstest]
#[case(0, 1_000)]
#[case(1, 2_000)]
#[case(4, 16_000)]
#[case(5, 30_000)]
#[case(40, 30_000)]
fn default_schedule(#[case] attempt: u32, #[case] floor_ms: u64) {
    assert_eq!(
        BackoffPolicy::default().floor(attempt),
        Duration::from_millis(floor_ms)
    );
}

#[test]
fn seeded_rng_is_reproducible() {
    let p = BackoffPolicy::default();
    let a: Vec<Duration> = {
        let mut rng = fastrand::Rng::with_seed(42);
        (0..8).map(|i| p.next_delay_with(i, &mut rng)).collect()
    };
    let b: Vec<Duration> = {
        let mut rng = fastrand::Rng::with_seed(42);
        (0..8).map(|i| p.next_delay_with(i, &mut rng)).collect()
    };
    assert_eq!(a, b);
}

proptest! {
    #[test]
    fn delay_is_floor_plus_bounded_jitter(
        initial in 1u64..5_000,
        extra in 0u64..120_000,
        jitter in 0u64..5_000,
        attempt in 0u32..200,
        seed in any::<u64>(),
    ) {
        let p = BackoffPolicy {
            initial: Duration::from_millis(initial),
            max: Duration::from_millis(initial + extra),
            jitter: Duration::from_millis(jitter),
        };
        let floor = p.floor(attempt);
        prop_assert!(floor <= p.max);
        prop_assert!(floor >= p.initial);

        let mut rng = fastrand::Rng::with_seed(seed);
        let d = p.next_delay_with(attempt, &mut rng);
        prop_assert!(d >= floor);
        if jitter == 0 {
            prop_assert_eq!(d, floor);
        } else {
            prop_assert!(d < floor + p.jitter);
        }
    }

    #[test]
    fn floor_is_non_decreasing(initial in 1u64..5_000, extra in 0u64..120_000, attempt in 0u32..100) {
        let p = BackoffPolicy {
            initial: Duration::from_millis(initial),
            max: Duration::from_millis(initial + extra),
            jitter: Duration::ZERO,
        };
        prop_assert!(p.floor(attempt) <= p.floor(attempt + 1));
    }
}
