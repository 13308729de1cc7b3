//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate the delay before retry number `attempt` (1-based).
///
/// The delay doubles from `base` up to `cap`; `jitter` (0.0..=1.0) is the
/// fraction of the delay that is randomized away, so the result never
/// exceeds `cap`.
pub fn calculate_backoff(attempt: u32, base: Duration, cap: Duration, jitter: f64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let cap_ms = cap.as_millis().min(u64::MAX as u128) as u64;
    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(cap_ms);

    let jitter_range = (capped_delay as f64 * jitter.clamp(0.0, 1.0)) as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay - jitter)
}
