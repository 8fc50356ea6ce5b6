/*!
 * Slice Usage Math
 * Fixed-point moving average and usage classification helpers
 */

use crate::core::limits::{FIXED_POINT_SCALE, WORST_CASE_USAGE_PCT};

/// `avg' = (prev * c + (scale - c) * used) / scale`
///
/// `c` is the smoothing constant in fixed point and is clamped to
/// `[0, FIXED_POINT_SCALE]`. Intermediates are 128-bit; the result saturates.
#[inline]
pub fn weighted_average(prev_avg: u64, used_ns: u64, c: u64) -> u64 {
    let scale = u128::from(FIXED_POINT_SCALE);
    let c = u128::from(c.min(FIXED_POINT_SCALE));
    let numerator = u128::from(prev_avg) * c + (scale - c) * u128::from(used_ns);
    u64::try_from(numerator / scale).unwrap_or(u64::MAX)
}

/// Part of the granted slice a task consumed
#[inline(always)]
pub fn used_time(slice_ns: u64, remaining_ns: u64) -> u64 {
    slice_ns.saturating_sub(remaining_ns)
}

/// Usage in percent of `slice_ns`; an unknown task counts as fully CPU-bound
#[inline]
pub fn slice_usage_pct(used_ns: Option<u64>, slice_ns: u64) -> u64 {
    match used_ns {
        Some(used) if slice_ns > 0 => {
            let pct = u128::from(used) * 100 / u128::from(slice_ns);
            u64::try_from(pct).unwrap_or(u64::MAX)
        }
        _ => WORST_CASE_USAGE_PCT,
    }
}
