use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for background loops.
///
/// Delay grows as `base * 2^(attempts-1)`, clamped to `cap`, with ±25%
/// jitter applied after clamping. `attempts == 0` is treated as the first
/// failure.
pub fn backoff_with_jitter(base: Duration, attempts: u32, cap: Duration) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let raw = base.saturating_mul(2u32.saturating_pow(exp));
    let clamped = raw.min(cap);

    let jitter = rand::thread_rng().gen_range(-0.25f64..=0.25f64);
    let millis = clamped.as_millis() as f64 * (1.0 + jitter);
    Duration::from_millis(millis.max(0.0) as u64)
}

/// Deterministic flavor used where tests need exact values.
pub fn backoff_unjittered(base: Duration, attempts: u32, cap: Duration) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    base.saturating_mul(2u32.saturating_pow(exp)).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unjittered_growth_and_cap() {
        let base = Duration::from_secs(60);
        let cap = Duration::from_secs(600);
        assert_eq!(backoff_unjittered(base, 1, cap), Duration::from_secs(60));
        assert_eq!(backoff_unjittered(base, 2, cap), Duration::from_secs(120));
        assert_eq!(backoff_unjittered(base, 3, cap), Duration::from_secs(240));
        assert_eq!(backoff_unjittered(base, 4, cap), Duration::from_secs(480));
        assert_eq!(backoff_unjittered(base, 5, cap), Duration::from_secs(600));
        assert_eq!(backoff_unjittered(base, 12, cap), Duration::from_secs(600));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(300);
        for attempts in 1..8 {
            let nominal = backoff_unjittered(base, attempts, cap);
            for _ in 0..32 {
                let d = backoff_with_jitter(base, attempts, cap);
                let lo = nominal.mul_f64(0.74);
                let hi = nominal.mul_f64(1.26);
                assert!(d >= lo && d <= hi, "attempt {attempts}: {d:?} outside [{lo:?}, {hi:?}]");
            }
        }
    }
}
