use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Per-component failure gate
///
/// Opens after `failure_threshold` recorded failures and closes again lazily, on the
/// first `allow_attempt` call made once `recovery_timeout` has passed since the last
/// failure. Successes are not recorded.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_time: Option<Instant>,
    pub recovery_timeout: Duration,
    pub is_open: bool,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

impl CircuitBreakerState {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_count: 0,
            failure_threshold,
            last_failure_time: None,
            recovery_timeout,
            is_open: false,
        }
    }

    /// Check whether an attempt may proceed, closing the breaker if it has cooled down
    pub fn allow_attempt(&mut self, component: &str) -> bool {
        if !self.is_open {
            return true;
        }

        let cooled_down = self
            .last_failure_time
            .map(|at| at.elapsed() >= self.recovery_timeout)
            .unwrap_or(true);

        if cooled_down {
            info!(
                "Circuit breaker for {} closed after {:?} recovery window",
                component, self.recovery_timeout
            );
            self.is_open = false;
            self.failure_count = 0;
            true
        } else {
            false
        }
    }

    pub fn record_failure(&mut self, component: &str) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        if !self.is_open && self.failure_count >= self.failure_threshold {
            self.is_open = true;
            warn!(
                "Circuit breaker opened for {} after {} failures",
                component, self.failure_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let mut breaker = CircuitBreakerState::new(3, Duration::from_secs(30));

        breaker.record_failure("database");
        breaker.record_failure("database");
        assert!(!breaker.is_open);
        assert!(breaker.allow_attempt("database"));

        breaker.record_failure("database");
        assert!(breaker.is_open);
        assert!(!breaker.allow_attempt("database"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_timeout() {
        let mut breaker = CircuitBreakerState::new(2, Duration::from_secs(30));
        breaker.record_failure("cache");
        breaker.record_failure("cache");
        assert!(!breaker.allow_attempt("cache"));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!breaker.allow_attempt("cache"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.allow_attempt("cache"));
        assert!(!breaker.is_open);
        assert_eq!(breaker.failure_count, 0);
    }

    #[test]
    fn test_defaults() {
        let breaker = CircuitBreakerState::default();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.recovery_timeout, Duration::from_secs(30));
        assert!(!breaker.is_open);
    }
}
