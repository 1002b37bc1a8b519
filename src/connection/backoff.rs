use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule for reconnect attempts
///
/// Delay doubles per attempt from `base` up to `max`, plus a uniform
/// random jitter in `[0, jitter]` so a fleet of clients does not hammer a
/// recovering hub in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl BackoffSchedule {
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self { base, max, jitter }
    }

    /// Delay before the given 0-based attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Shift capped well below overflow; max clamps long before that
        let exponential = self.base.saturating_mul(1u32 << attempt.min(16));
        let capped = exponential.min(self.max);

        if self.jitter.is_zero() {
            capped
        } else {
            let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
            capped + Duration::from_millis(extra)
        }
    }
}

impl From<&BackoffConfig> for BackoffSchedule {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_ms),
            Duration::from_millis(config.jitter_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(base_ms: u64, max_ms: u64, jitter_ms: u64) -> BackoffSchedule {
        BackoffSchedule::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            Duration::from_millis(jitter_ms),
        )
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let backoff = schedule(1000, 60_000, 0);
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = schedule(1000, 5000, 0);
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(5000));
        assert_eq!(backoff.delay_for_attempt(30), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = schedule(1000, 30_000, 250);
        for _ in 0..100 {
            let delay = backoff.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_from_config() {
        // Default base 1s, jitter 250ms
        let backoff = BackoffSchedule::from(&BackoffConfig::default());
        let delay = backoff.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(1000));
        assert!(delay <= Duration::from_millis(1250));
    }
}
