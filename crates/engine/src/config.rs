//! Engine tuning knobs.

use std::time::Duration;

/// Failure classes a retry policy may apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    Expression,
    Credential,
    NodeExecution,
}

/// Retry behaviour applied to failing node invocations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total invocation ceiling (1 = no retries).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Only failures of these kinds are retried, and only when the node
    /// reported the failure as transient.
    pub retryable_kinds: Vec<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            retryable_kinds: vec![FailureKind::NodeExecution],
        }
    }
}

impl RetryPolicy {
    /// Back-off before the given retry: `initial * multiplier^(attempt-1)`,
    /// capped at `max_delay`.  `attempt` is 1-based.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let raw = self.initial_delay.as_millis() as f64 * factor;
        Duration::from_millis(raw as u64).min(self.max_delay)
    }

    pub fn retries(&self, kind: FailureKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }
}

/// Engine-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded worker-pool size per execution.
    pub worker_count: usize,
    /// Fallback execution timeout when workflow settings carry none.
    pub default_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            default_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Read `EXECUTION_WORKER_COUNT` and `DEFAULT_EXECUTION_TIMEOUT_MS` from
    /// the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(count) = read_env::<usize>("EXECUTION_WORKER_COUNT") {
            if count > 0 {
                config.worker_count = count;
            }
        }
        if let Some(ms) = read_env::<u64>("DEFAULT_EXECUTION_TIMEOUT_MS") {
            config.default_timeout = Some(Duration::from_millis(ms));
        }
        config
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(35),
            retryable_kinds: vec![FailureKind::NodeExecution],
        };
        assert_eq!(policy.delay_before(1), Duration::from_millis(10));
        assert_eq!(policy.delay_before(2), Duration::from_millis(20));
        // 40ms exceeds the cap.
        assert_eq!(policy.delay_before(3), Duration::from_millis(35));
    }
}
