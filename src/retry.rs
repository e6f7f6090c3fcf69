use rand::Rng;
use std::time::Duration;

/// Bounded retry schedule: max attempts, base delay, backoff multiplier
///
/// `max_retries` counts the calls made *after* the first one, so a policy with
/// `max_retries = 3` performs at most four calls in total.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the computed delay added as random jitter (0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            multiplier,
            ..Self::default()
        }
    }

    /// Policy that retries immediately (tests, backfill against local sources)
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, 1.0)
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(retry as i32 - 1);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether retry number `retry` (1-based) is still within budget
    pub fn allows(&self, retry: u32) -> bool {
        retry >= 1 && retry <= self.max_retries
    }

    /// Sleep for the delay of retry number `retry`
    pub async fn wait(&self, retry: u32) {
        let mut delay = self.delay_for(retry);
        if self.jitter > 0.0 && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..self.jitter);
            delay += delay.mul_f64(extra);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), 2.0);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped() {
        let mut policy = RetryPolicy::new(10, Duration::from_secs(1), 3.0);
        policy.max_delay = Duration::from_secs(5);
        assert_eq!(policy.delay_for(6), Duration::from_secs(5));
    }

    #[test]
    fn test_allows_budget() {
        let policy = RetryPolicy::immediate(3);
        assert!(!policy.allows(0));
        assert!(policy.allows(1));
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }

    #[tokio::test]
    async fn test_immediate_wait_returns() {
        let policy = RetryPolicy::immediate(2).with_jitter(0.5);
        tokio_test::assert_ready!(tokio_test::task::spawn(policy.wait(1)).poll());
    }
}
