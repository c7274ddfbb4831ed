//! Backoff calculator
//!
//! Pure `(strategy, attempt) -> seconds`. Attempts are 1-based; attempt 0 is
//! treated as the first attempt.
//!
//! | Strategy | Delay | Cap |
//! |----------|-------|-----|
//! | ExponentialBackoff | 5 * 2^(n-1) | 300 |
//! | LinearBackoff | 5 * n | 600 |
//! | CircuitBreaker | 1800 | fixed |
//! | everything else | 0 | - |

use rro_core::{BackoffConfig, BackoffFamily, RecoveryStrategy};
use std::time::Duration;

/// Delay in seconds under the default schedule
#[inline]
#[must_use]
pub fn delay(strategy: RecoveryStrategy, attempt: u32) -> u64 {
    BackoffCalculator::default().delay(strategy, attempt)
}

/// Backoff schedule with configurable bases and caps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    /// Create calculator with a custom schedule
    #[inline]
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay in seconds before `attempt`
    #[must_use]
    pub fn delay(&self, strategy: RecoveryStrategy, attempt: u32) -> u64 {
        let n = attempt.max(1);
        let c = &self.config;
        match strategy.backoff_family() {
            BackoffFamily::None => 0,
            BackoffFamily::Exponential => {
                let factor = 1u64.checked_shl(n - 1).unwrap_or(u64::MAX);
                c.exponential_base_secs
                    .saturating_mul(factor)
                    .min(c.exponential_max_secs)
            }
            BackoffFamily::Linear => c
                .linear_step_secs
                .saturating_mul(u64::from(n))
                .min(c.linear_max_secs),
            BackoffFamily::Fixed => c.circuit_breaker_secs,
        }
    }

    /// Delay as a `Duration`
    #[inline]
    #[must_use]
    pub fn delay_duration(&self, strategy: RecoveryStrategy, attempt: u32) -> Duration {
        Duration::from_secs(self.delay(strategy, attempt))
    }

    /// Delays for attempts `1..=attempts`
    #[must_use]
    pub fn schedule(&self, strategy: RecoveryStrategy, attempts: u32) -> Vec<u64> {
        (1..=attempts).map(|n| self.delay(strategy, n)).collect()
    }

    /// Schedule in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_then_caps() {
        let calc = BackoffCalculator::default();
        assert_eq!(
            calc.schedule(RecoveryStrategy::ExponentialBackoff, 8),
            vec![5, 10, 20, 40, 80, 160, 300, 300]
        );
    }

    #[test]
    fn linear_grows_then_caps() {
        assert_eq!(delay(RecoveryStrategy::LinearBackoff, 1), 5);
        assert_eq!(delay(RecoveryStrategy::LinearBackoff, 4), 20);
        assert_eq!(delay(RecoveryStrategy::LinearBackoff, 500), 600);
    }

    #[test]
    fn circuit_breaker_is_fixed() {
        assert_eq!(delay(RecoveryStrategy::CircuitBreaker, 1), 1_800);
        assert_eq!(delay(RecoveryStrategy::CircuitBreaker, 40), 1_800);
    }

    #[test]
    fn non_backoff_strategies_are_immediate() {
        for strategy in [
            RecoveryStrategy::ImmediateRetry,
            RecoveryStrategy::RetryDifferentAgent,
            RecoveryStrategy::ContextReconstruction,
            RecoveryStrategy::EscalateToHuman,
        ] {
            assert_eq!(delay(strategy, 3), 0, "{strategy}");
        }
    }

    #[test]
    fn attempt_zero_is_first_attempt() {
        assert_eq!(delay(RecoveryStrategy::ExponentialBackoff, 0), 5);
        assert_eq!(delay(RecoveryStrategy::LinearBackoff, 0), 5);
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        assert_eq!(delay(RecoveryStrategy::ExponentialBackoff, u32::MAX), 300);
        assert_eq!(delay(RecoveryStrategy::LinearBackoff, u32::MAX), 600);
    }

    #[test]
    fn custom_schedule() {
        let calc = BackoffCalculator::new(BackoffConfig {
            exponential_base_secs: 1,
            exponential_max_secs: 4,
            ..BackoffConfig::default()
        });
        assert_eq!(calc.schedule(RecoveryStrategy::ExponentialBackoff, 4), vec![1, 2, 4, 4]);
    }
}
