//! Exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

/// Calculate the delay before the next retry.
///
/// Base delay doubles with each consecutive failure (`base * 2^failures`),
/// capped at `cap`, then perturbed by a uniform factor of ±`jitter_fraction`
/// so that many clients recovering from the same outage don't retry in
/// lockstep.
pub fn delay(consecutive_failures: u32, base: Duration, cap: Duration, jitter_fraction: f64) -> Duration {
    let exponent = consecutive_failures.min(32);
    let base_ms = base.as_millis() as u64;
    let scaled_ms = base_ms.saturating_mul(2u64.saturating_pow(exponent));
    let capped_ms = scaled_ms.min(cap.as_millis() as u64);

    if jitter_fraction <= 0.0 {
        return Duration::from_millis(capped_ms);
    }

    let factor = rand::thread_rng().gen_range(1.0 - jitter_fraction..=1.0 + jitter_fraction);
    Duration::from_millis((capped_ms as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_failure_without_jitter() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        assert_eq!(delay(0, base, cap, 0.0), Duration::from_secs(1));
        assert_eq!(delay(1, base, cap, 0.0), Duration::from_secs(2));
        assert_eq!(delay(2, base, cap, 0.0), Duration::from_secs(4));
        assert_eq!(delay(3, base, cap, 0.0), Duration::from_secs(8));
    }

    #[test]
    fn caps_large_failure_counts() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        assert_eq!(delay(10, base, cap, 0.0), Duration::from_secs(60));
        // Large enough to overflow the exponent without the min() guard
        assert_eq!(delay(200, base, cap, 0.0), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let base = Duration::from_secs(4);
        let cap = Duration::from_secs(60);
        for _ in 0..100 {
            let d = delay(0, base, cap, 0.25);
            assert!(d >= Duration::from_secs(3), "too short: {:?}", d);
            assert!(d <= Duration::from_secs(5), "too long: {:?}", d);
        }
    }
}
