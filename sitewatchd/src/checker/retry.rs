use std::time::Duration;
use crate::checker::verdict::ErrorClass;
use crate::config::{CheckerConfig, RetryBudgets};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Per-class retry budgets plus attempt timing. Pure lookups, no I/O.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    budgets: RetryBudgets,
    delay: Duration,
    first_timeout: Duration,
    retry_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        budgets: RetryBudgets,
        delay: Duration,
        first_timeout: Duration,
        retry_timeout: Duration,
    ) -> Self {
        Self {
            budgets,
            delay,
            first_timeout,
            retry_timeout,
        }
    }

    pub fn from_config(config: &CheckerConfig) -> Self {
        Self::new(
            config.retries,
            Duration::from_millis(config.retry_delay_ms),
            Duration::from_millis(config.first_timeout_ms),
            Duration::from_millis(config.retry_timeout_ms),
        )
    }

    /// Extra attempts allowed after a failure of this class
    pub fn extra_attempts(&self, class: ErrorClass) -> u32 {
        match class {
            ErrorClass::Timeout => self.budgets.timeout,
            ErrorClass::ConnectionReset => self.budgets.connection_reset,
            ErrorClass::Upstream5xx => self.budgets.upstream_5xx,
            ErrorClass::Dns
            | ErrorClass::ConnectionRefused
            | ErrorClass::Tls
            | ErrorClass::Other => 0,
        }
    }

    /// `attempts_made` counts every attempt so far, whatever its class.
    pub fn decide(&self, class: ErrorClass, attempts_made: u32) -> RetryDecision {
        if class.is_retryable() && attempts_made <= self.extra_attempts(class) {
            RetryDecision::Retry { delay: self.delay }
        } else {
            RetryDecision::GiveUp
        }
    }

    /// The first attempt gets extra room for cold starts.
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.first_timeout
        } else {
            self.retry_timeout
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CheckerConfig::default())
    }
}
