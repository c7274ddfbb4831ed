//! Recovery strategies and decisions
//!
//! The strategy set is closed. Every strategy carries:
//! - The backoff family used to compute its retry delay
//! - A maximum retry budget
//! - The decision it maps to when confidence allows acting on it

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named policy for responding to a failed task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-run straight away, no delay
    ImmediateRetry,
    /// Re-run after a doubling delay
    ExponentialBackoff,
    /// Re-run after a linearly growing delay
    LinearBackoff,
    /// Hold the task for a fixed cool-down window
    CircuitBreaker,
    /// Clear the assignment so another agent picks the task up
    RetryDifferentAgent,
    /// Split the task into smaller children
    DecomposeIntoSubtasks,
    /// Re-run with a hint to change approach
    AlternativeApproach,
    /// Complete with partial credit and a fallback marker
    SkipWithFallback,
    /// Re-run with a hint to rebuild missing context
    ContextReconstruction,
    /// Stop automatic handling
    EscalateToHuman,
}

impl RecoveryStrategy {
    /// Every strategy, in declaration order
    pub const ALL: [RecoveryStrategy; 10] = [
        RecoveryStrategy::ImmediateRetry,
        RecoveryStrategy::ExponentialBackoff,
        RecoveryStrategy::LinearBackoff,
        RecoveryStrategy::CircuitBreaker,
        RecoveryStrategy::RetryDifferentAgent,
        RecoveryStrategy::DecomposeIntoSubtasks,
        RecoveryStrategy::AlternativeApproach,
        RecoveryStrategy::SkipWithFallback,
        RecoveryStrategy::ContextReconstruction,
        RecoveryStrategy::EscalateToHuman,
    ];

    /// Canonical snake_case name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImmediateRetry => "immediate_retry",
            Self::ExponentialBackoff => "exponential_backoff",
            Self::LinearBackoff => "linear_backoff",
            Self::CircuitBreaker => "circuit_breaker",
            Self::RetryDifferentAgent => "retry_different_agent",
            Self::DecomposeIntoSubtasks => "decompose_into_subtasks",
            Self::AlternativeApproach => "alternative_approach",
            Self::SkipWithFallback => "skip_with_fallback",
            Self::ContextReconstruction => "context_reconstruction",
            Self::EscalateToHuman => "escalate_to_human",
        }
    }

    /// Backoff family used for the retry delay
    #[inline]
    #[must_use]
    pub fn backoff_family(&self) -> BackoffFamily {
        match self {
            Self::ExponentialBackoff => BackoffFamily::Exponential,
            Self::LinearBackoff => BackoffFamily::Linear,
            Self::CircuitBreaker => BackoffFamily::Fixed,
            _ => BackoffFamily::None,
        }
    }

    /// Maximum number of retries this strategy may consume
    #[inline]
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::ImmediateRetry => 3,
            Self::ExponentialBackoff | Self::LinearBackoff | Self::AlternativeApproach => 5,
            Self::CircuitBreaker | Self::RetryDifferentAgent | Self::ContextReconstruction => 3,
            Self::DecomposeIntoSubtasks | Self::SkipWithFallback => 1,
            Self::EscalateToHuman => 0,
        }
    }

    /// Decision this strategy produces before any gate is applied
    #[inline]
    #[must_use]
    pub fn default_decision(&self) -> RecoveryDecision {
        match self {
            Self::DecomposeIntoSubtasks => RecoveryDecision::Decompose,
            Self::SkipWithFallback => RecoveryDecision::Skip,
            Self::EscalateToHuman => RecoveryDecision::Escalate,
            _ => RecoveryDecision::Retry,
        }
    }

    /// Comma-separated list of every canonical name
    #[must_use]
    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(RecoveryStrategy::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for names outside the strategy set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown recovery strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for RecoveryStrategy {
    type Err = UnknownStrategy;

    /// Accepts `exponential_backoff` and `EXPONENTIAL_BACKOFF`. Nothing else.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

/// How a strategy's delay grows with the attempt number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffFamily {
    /// No delay
    None,
    /// base * 2^(attempt - 1)
    Exponential,
    /// step * attempt
    Linear,
    /// Constant window
    Fixed,
}

/// Disposition of a failed task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDecision {
    /// Re-queue the task
    Retry,
    /// Hand off to a human, no further automatic attempts
    Escalate,
    /// Complete with fallback credit
    Skip,
    /// Split into subtasks
    Decompose,
}

impl RecoveryDecision {
    /// Canonical snake_case name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Escalate => "escalate",
            Self::Skip => "skip",
            Self::Decompose => "decompose",
        }
    }

    /// Whether no further automatic attempt follows this decision
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retry)
    }
}

impl fmt::Display for RecoveryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_round_trip_through_from_str() {
        for strategy in RecoveryStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<RecoveryStrategy>(), Ok(strategy));
        }
    }

    #[test]
    fn strategy_accepts_screaming_case() {
        assert_eq!(
            "LINEAR_BACKOFF".parse::<RecoveryStrategy>(),
            Ok(RecoveryStrategy::LinearBackoff)
        );
    }

    #[test]
    fn strategy_rejects_unknown_names() {
        assert!("retry_forever".parse::<RecoveryStrategy>().is_err());
        assert!("".parse::<RecoveryStrategy>().is_err());
        assert!("exponential backoff".parse::<RecoveryStrategy>().is_err());
    }

    #[test]
    fn escalate_has_no_budget() {
        assert_eq!(RecoveryStrategy::EscalateToHuman.max_retries(), 0);
        assert_eq!(
            RecoveryStrategy::EscalateToHuman.default_decision(),
            RecoveryDecision::Escalate
        );
    }

    #[test]
    fn decisions_follow_strategy() {
        assert_eq!(
            RecoveryStrategy::DecomposeIntoSubtasks.default_decision(),
            RecoveryDecision::Decompose
        );
        assert_eq!(
            RecoveryStrategy::SkipWithFallback.default_decision(),
            RecoveryDecision::Skip
        );
        assert_eq!(
            RecoveryStrategy::RetryDifferentAgent.default_decision(),
            RecoveryDecision::Retry
        );
        assert!(!RecoveryDecision::Retry.is_terminal());
        assert!(RecoveryDecision::Escalate.is_terminal());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&RecoveryStrategy::ContextReconstruction).unwrap();
        assert_eq!(json, "\"context_reconstruction\"");
    }
}
