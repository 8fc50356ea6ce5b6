/*!
 * Slice Usage Math Tests
 * Fixed-point moving average properties
 */

use proptest::prelude::*;
use scx_host::core::limits::{FIXED_POINT_SCALE, WORST_CASE_USAGE_PCT};
use scx_host::sched::usage::{slice_usage_pct, used_time, weighted_average};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn zero_weight_takes_the_new_sample(used in any::<u64>()) {
        prop_assert_eq!(weighted_average(0, used, 0), used);
    }

    #[test]
    fn full_weight_keeps_the_average(prev in any::<u64>(), used in any::<u64>()) {
        prop_assert_eq!(weighted_average(prev, used, FIXED_POINT_SCALE), prev);
    }

    #[test]
    fn average_stays_between_inputs(
        prev in 0u64..1_000_000_000_000,
        used in 0u64..1_000_000_000_000,
        c in 0u64..=FIXED_POINT_SCALE,
    ) {
        let avg = weighted_average(prev, used, c);
        prop_assert!(avg >= prev.min(used));
        prop_assert!(avg <= prev.max(used));
    }

    #[test]
    fn oversized_weight_is_clamped(prev in any::<u64>(), used in any::<u64>(), c in FIXED_POINT_SCALE..) {
        prop_assert_eq!(weighted_average(prev, used, c), prev);
    }

    #[test]
    fn used_time_never_exceeds_slice(slice in any::<u64>(), remaining in any::<u64>()) {
        prop_assert!(used_time(slice, remaining) <= slice);
    }

    #[test]
    fn unknown_task_is_worst_case(slice in any::<u64>()) {
        prop_assert_eq!(slice_usage_pct(None, slice), WORST_CASE_USAGE_PCT);
    }
}

#[test]
fn test_repeated_short_runs_converge_below_threshold() {
    let slice = 20_000_000u64;
    let c = 990_000;
    // Start from the worst case and feed 1% samples
    let mut avg = slice;
    for _ in 0..1_000 {
        avg = weighted_average(avg, slice / 100, c);
    }
    assert!(slice_usage_pct(Some(avg), slice) < 5);
}
