//! Deterministic fallback table
//!
//! Used whenever the advisor is absent, slow, or wrong. Rules are checked in
//! order; the first match picks the strategy:
//!
//! 1. timeout in the error -> ExponentialBackoff
//! 2. missing / context -> ContextReconstruction
//! 3. agent / skill -> RetryDifferentAgent
//! 4. attempts >= `skip_after_attempts` -> SkipWithFallback
//! 5. complex task name or attempts >= `decompose_after_attempts` -> DecomposeIntoSubtasks
//! 6. otherwise -> AlternativeApproach
//!
//! Confidence is the rule's base minus `attempt_penalty` per previous attempt,
//! floored at `min_confidence`, so it never rises as attempts accumulate.

use crate::engine::{PolicyRecommendation, RecommendationSource};
use rro_core::{HeuristicConfig, RecoveryContext, RecoveryStrategy};

/// Rule that fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicRule {
    /// Timeout mentioned
    Timeout,
    /// Missing data or context mentioned
    MissingContext,
    /// Agent capability mentioned
    AgentCapability,
    /// Too many attempts to keep trying
    RepeatedFailure,
    /// Task too large or failing repeatedly
    Complexity,
    /// Nothing specific
    Default,
}

impl HeuristicRule {
    fn strategy(self) -> RecoveryStrategy {
        match self {
            Self::Timeout => RecoveryStrategy::ExponentialBackoff,
            Self::MissingContext => RecoveryStrategy::ContextReconstruction,
            Self::AgentCapability => RecoveryStrategy::RetryDifferentAgent,
            Self::RepeatedFailure => RecoveryStrategy::SkipWithFallback,
            Self::Complexity => RecoveryStrategy::DecomposeIntoSubtasks,
            Self::Default => RecoveryStrategy::AlternativeApproach,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Timeout => "error mentions a timeout",
            Self::MissingContext => "error points at missing data or context",
            Self::AgentCapability => "error points at the assigned agent's capabilities",
            Self::RepeatedFailure => "task keeps failing",
            Self::Complexity => "task looks too large for one attempt",
            Self::Default => "no specific signal in the error",
        }
    }
}

/// Heuristic recommendation table
#[derive(Debug, Clone, Default)]
pub struct HeuristicTable {
    config: HeuristicConfig,
}

impl HeuristicTable {
    /// Create table from configuration
    #[inline]
    #[must_use]
    pub fn new(config: HeuristicConfig) -> Self {
        Self { config }
    }

    /// Rule that applies to a context
    #[must_use]
    pub fn rule_for(&self, context: &RecoveryContext) -> HeuristicRule {
        let text = match &context.error_type {
            Some(t) => format!("{} {}", context.error_message, t),
            None => context.error_message.clone(),
        }
        .to_lowercase();
        let attempts = context.previous_attempts;

        if text.contains("timeout") || text.contains("timed out") {
            HeuristicRule::Timeout
        } else if text.contains("missing") || text.contains("context") {
            HeuristicRule::MissingContext
        } else if text.contains("agent") || text.contains("skill") {
            HeuristicRule::AgentCapability
        } else if attempts >= self.config.skip_after_attempts {
            HeuristicRule::RepeatedFailure
        } else if attempts >= self.config.decompose_after_attempts
            || self.is_complex(context.task_name.as_deref())
        {
            HeuristicRule::Complexity
        } else {
            HeuristicRule::Default
        }
    }

    /// Recommendation for a context
    #[must_use]
    pub fn recommend(&self, context: &RecoveryContext) -> PolicyRecommendation {
        let rule = self.rule_for(context);
        let strategy = rule.strategy();
        let confidence = self.decayed(self.base_confidence(rule), context.previous_attempts);

        PolicyRecommendation {
            strategy,
            confidence,
            max_retries: strategy.max_retries(),
            reasoning: format!(
                "heuristic: {} after {} previous attempt(s), recommending {}",
                rule.describe(),
                context.previous_attempts,
                strategy
            ),
            ai_used: false,
            source: RecommendationSource::Heuristic,
        }
    }

    /// Apply the per-attempt penalty and floor to any confidence
    #[must_use]
    pub fn decayed(&self, base: f64, previous_attempts: u32) -> f64 {
        let penalty = self.config.attempt_penalty * f64::from(previous_attempts);
        (base - penalty).clamp(self.config.min_confidence, 1.0)
    }

    /// Lower bound on heuristic confidence
    #[inline]
    #[must_use]
    pub fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    fn base_confidence(&self, rule: HeuristicRule) -> f64 {
        let c = &self.config;
        match rule {
            HeuristicRule::Timeout => c.timeout_confidence,
            HeuristicRule::MissingContext => c.context_confidence,
            HeuristicRule::AgentCapability => c.agent_confidence,
            HeuristicRule::RepeatedFailure => c.skip_confidence,
            HeuristicRule::Complexity => c.decompose_confidence,
            HeuristicRule::Default => c.alternative_confidence,
        }
    }

    fn is_complex(&self, task_name: Option<&str>) -> bool {
        let Some(name) = task_name else {
            return false;
        };
        let lowered = name.to_lowercase();
        lowered.split_whitespace().count() >= self.config.complex_name_word_threshold
            || self
                .config
                .complex_name_keywords
                .iter()
                .any(|k| lowered.contains(k.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx(message: &str, attempts: u32) -> RecoveryContext {
        RecoveryContext::new("t-1", "ws-1", message).with_previous_attempts(attempts)
    }

    fn strategy(message: &str, attempts: u32) -> RecoveryStrategy {
        HeuristicTable::default().recommend(&ctx(message, attempts)).strategy
    }

    #[test]
    fn keyword_rules() {
        assert_eq!(strategy("operation timeout", 0), RecoveryStrategy::ExponentialBackoff);
        assert_eq!(strategy("missing deliverable", 0), RecoveryStrategy::ContextReconstruction);
        assert_eq!(strategy("agent lacks skill: sql", 0), RecoveryStrategy::RetryDifferentAgent);
    }

    #[test]
    fn attempt_rules() {
        assert_eq!(strategy("KeyError", 0), RecoveryStrategy::AlternativeApproach);
        assert_eq!(strategy("KeyError", 2), RecoveryStrategy::DecomposeIntoSubtasks);
        assert_eq!(strategy("KeyError", 3), RecoveryStrategy::SkipWithFallback);
        assert_eq!(strategy("KeyError", 9), RecoveryStrategy::SkipWithFallback);
    }

    #[test]
    fn complex_names_decompose() {
        let table = HeuristicTable::default();
        let context = ctx("KeyError", 0).with_task_name("Comprehensive market analysis");
        assert_eq!(table.rule_for(&context), HeuristicRule::Complexity);

        let long = ctx("KeyError", 0)
            .with_task_name("draft and review and publish and translate the quarterly newsletter");
        assert_eq!(table.rule_for(&long), HeuristicRule::Complexity);
    }

    #[test]
    fn error_type_is_part_of_the_text() {
        let context = ctx("request aborted", 0).with_error_type("TimeoutError");
        assert_eq!(
            HeuristicTable::default().rule_for(&context),
            HeuristicRule::Timeout
        );
    }

    #[test]
    fn confidence_at_three_attempts_is_lower() {
        let table = HeuristicTable::default();
        for message in ["KeyError: x", "operation timeout", "missing field", "agent error"] {
            let fresh = table.recommend(&ctx(message, 0)).confidence;
            let worn = table.recommend(&ctx(message, 3)).confidence;
            assert!(worn < fresh, "{message}: {worn} !< {fresh}");
        }
    }

    #[test]
    fn confidence_is_floored() {
        let table = HeuristicTable::default();
        let rec = table.recommend(&ctx("KeyError", 1_000));
        assert!((rec.confidence - table.min_confidence()).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_confidence_never_rises_with_attempts(
            message in "[a-zA-Z ]{0,40}",
            attempts in 0u32..50,
        ) {
            let table = HeuristicTable::default();
            let now = table.recommend(&ctx(&message, attempts)).confidence;
            let later = table.recommend(&ctx(&message, attempts + 1)).confidence;
            prop_assert!(later <= now, "{} > {}", later, now);
        }

        #[test]
        fn prop_confidence_stays_in_unit_range(
            message in ".{0,80}",
            attempts in 0u32..10_000,
        ) {
            let confidence = HeuristicTable::default().recommend(&ctx(&message, attempts)).confidence;
            prop_assert!((0.0..=1.0).contains(&confidence));
        }
    }
}
