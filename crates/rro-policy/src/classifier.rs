//! Failure classifier
//!
//! Deterministic first pass over a failure: scan an ordered catalog of known
//! failure patterns and return the first one whose matcher accepts the error.
//! A miss is not an error, it sends the caller on to the policy engine.
//!
//! Built-in catalog, in match order:
//!
//! | Pattern | Strategy | Confidence | Budget |
//! |---------|----------|------------|--------|
//! | `missing_orchestration_context` | ImmediateRetry | 0.95 | 2 |
//! | `rate_limited` | LinearBackoff | 0.90 | 5 |
//! | `connection_or_timeout` | ExponentialBackoff | 0.75 | 3 |
//! | `unresolved_dependency` | EscalateToHuman | 0.85 | 0 |

use once_cell::sync::Lazy;
use regex::Regex;
use rro_core::{RecoveryContext, RecoveryStrategy};
use std::sync::Arc;

/// Predicate over error text and error type. Either side matching is enough.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    message: Option<Regex>,
    error_types: Vec<String>,
}

impl PatternMatcher {
    /// Match error text against a regex
    pub fn message(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            message: Some(Regex::new(pattern)?),
            error_types: Vec::new(),
        })
    }

    /// Also match these error type names (case-insensitive)
    #[must_use]
    pub fn or_error_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Check the matcher against one failure
    #[must_use]
    pub fn matches(&self, error_message: &str, context: &RecoveryContext) -> bool {
        self.error_types.iter().any(|t| context.error_type_is(t))
            || self
                .message
                .as_ref()
                .is_some_and(|re| re.is_match(error_message))
    }
}

/// A known failure mode and its default handling
#[derive(Debug, Clone)]
pub struct FailurePattern {
    /// Stable id, recorded on analysis results
    pub pattern_id: String,
    /// What the pattern catches
    pub description: String,
    /// Predicate
    pub matcher: PatternMatcher,
    /// Strategy to apply on match
    pub default_strategy: RecoveryStrategy,
    /// Confidence of that strategy
    pub default_confidence: f64,
    /// Retry budget; the strategy's own budget still applies
    pub max_retries_for_pattern: u32,
}

impl FailurePattern {
    /// Effective retry budget for this pattern
    #[inline]
    #[must_use]
    pub fn retry_budget(&self) -> u32 {
        self.max_retries_for_pattern
            .min(self.default_strategy.max_retries())
    }
}

fn builtin(
    id: &str,
    description: &str,
    regex: &str,
    error_types: &[&str],
    strategy: RecoveryStrategy,
    confidence: f64,
    max_retries: u32,
) -> FailurePattern {
    let matcher = PatternMatcher::message(regex)
        .expect("built-in failure pattern regex is valid")
        .or_error_types(error_types.iter().copied());
    FailurePattern {
        pattern_id: id.to_string(),
        description: description.to_string(),
        matcher,
        default_strategy: strategy,
        default_confidence: confidence,
        max_retries_for_pattern: max_retries,
    }
}

static BUILTIN_PATTERNS: Lazy<Arc<[FailurePattern]>> = Lazy::new(|| {
    vec![
        builtin(
            "missing_orchestration_context",
            "required orchestration context field missing from the task payload",
            r"(?is)orchestration_?context\b.*\bfield required|missing required (context )?field",
            &[],
            RecoveryStrategy::ImmediateRetry,
            0.95,
            2,
        ),
        builtin(
            "rate_limited",
            "provider rate limit or HTTP 429",
            r"(?i)rate[ _-]?limit|\b429\b|too many requests|quota exceeded",
            &["RateLimitError"],
            RecoveryStrategy::LinearBackoff,
            0.9,
            5,
        ),
        builtin(
            "connection_or_timeout",
            "transient network failure or timeout",
            r"(?i)connection (refused|reset|aborted|closed|error)|timed out|\btimeout\b|network (error|unreachable)|broken pipe",
            &["TimeoutError", "ConnectionError"],
            RecoveryStrategy::ExponentialBackoff,
            0.75,
            3,
        ),
        builtin(
            "unresolved_dependency",
            "code dependency that cannot be resolved without a human",
            r"(?i)\b(ImportError|ModuleNotFoundError)\b|no module named|cannot import name|unresolved (import|dependency)",
            &["ImportError", "ModuleNotFoundError"],
            RecoveryStrategy::EscalateToHuman,
            0.85,
            0,
        ),
    ]
    .into()
});

/// Ordered, read-only pattern catalog. Cheap to clone and share.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    patterns: Arc<[FailurePattern]>,
}

impl FailureClassifier {
    /// Classifier over the built-in catalog
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: Arc::clone(&BUILTIN_PATTERNS),
        }
    }

    /// Classifier over a custom catalog, matched in the given order
    #[must_use]
    pub fn with_patterns(patterns: Vec<FailurePattern>) -> Self {
        Self {
            patterns: patterns.into(),
        }
    }

    /// First pattern that matches, if any
    #[must_use]
    pub fn classify(
        &self,
        error_message: &str,
        context: &RecoveryContext,
    ) -> Option<&FailurePattern> {
        let found = self
            .patterns
            .iter()
            .find(|p| p.matcher.matches(error_message, context));
        if let Some(pattern) = found {
            tracing::debug!(
                task_id = %context.task_id,
                pattern_id = %pattern.pattern_id,
                "failure pattern matched"
            );
        }
        found
    }

    /// Catalog in match order
    #[inline]
    #[must_use]
    pub fn patterns(&self) -> &[FailurePattern] {
        &self.patterns
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}
