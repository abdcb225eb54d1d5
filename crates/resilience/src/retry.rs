use rand::Rng;
use std::time::Duration;

/// Upper bound for a single backoff delay regardless of attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    /// Relative jitter applied to each delay, e.g. 0.2 for ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based), jittered.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64((1.0 + spread).max(0.0)).min(MAX_BACKOFF)
    }

    fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry as i32);
        self.initial_backoff.mul_f64(factor).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.base_delay(0), Duration::from_millis(200));
        assert_eq!(policy.base_delay(1), Duration::from_millis(400));
        assert_eq!(policy.base_delay(2), Duration::from_millis(800));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::default();

        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_millis(320), "{delay:?}");
            assert!(delay <= Duration::from_millis(480), "{delay:?}");
        }
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            attempts: 10,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.base_delay(30), MAX_BACKOFF);
        assert!(policy.delay(30) <= MAX_BACKOFF);
    }
}
