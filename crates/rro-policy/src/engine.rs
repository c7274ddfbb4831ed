//! Recovery policy engine
//!
//! Produces a strategy recommendation for failures the classifier did not
//! recognise:
//! - With an enabled advisor, ask it, validate the reply, and use it
//! - On advisor absence, timeout, error, or invalid reply, use the heuristic table
//!
//! `analyze` never fails. Advisor failures lower the fallback's confidence by
//! `failure_penalty`; a fault inside the advisor call (panic) pins it to
//! `internal_fault_confidence`.

use crate::heuristics::HeuristicTable;
use rro_core::{
    AdvisorConfig, AdvisorError, AdvisorRequest, RecoveryAdvisor, RecoveryConfig,
    RecoveryContext, RecoveryStrategy,
};
use serde::Deserialize;
use std::sync::Arc;

/// Where a recommendation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationSource {
    /// Validated advisor reply
    Advisor,
    /// Heuristic table, no advisor consulted
    Heuristic,
    /// Heuristic table after the advisor failed
    AdvisorFallback,
    /// Heuristic strategy after the advisor call faulted
    InternalFault,
}

/// Output of the policy engine
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRecommendation {
    /// Recommended strategy
    pub strategy: RecoveryStrategy,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Retry budget for the strategy
    pub max_retries: u32,
    /// Human-readable reasoning
    pub reasoning: String,
    /// Whether the advisor's reply was used
    pub ai_used: bool,
    /// Origin
    pub source: RecommendationSource,
}

#[derive(Debug, Deserialize)]
struct RawRecommendation {
    strategy: String,
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Validated advisor reply
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorRecommendation {
    /// Strategy from the known set
    pub strategy: RecoveryStrategy,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Advisor's reasoning
    pub reasoning: String,
}

/// Parse and validate a raw advisor reply.
///
/// Accepts a bare JSON object or one embedded in surrounding text
/// (e.g. a fenced code block). Strategy must be in the known set and
/// confidence must be a finite number in [0, 1].
pub fn parse_advisor_reply(raw: &str) -> Result<AdvisorRecommendation, AdvisorError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &raw[s..=e],
        _ => return Err(AdvisorError::Malformed("no JSON object in reply".to_string())),
    };

    let parsed: RawRecommendation =
        serde_json::from_str(json).map_err(|e| AdvisorError::Malformed(e.to_string()))?;

    let strategy = parsed
        .strategy
        .parse::<RecoveryStrategy>()
        .map_err(|_| AdvisorError::InvalidStrategy(parsed.strategy.clone()))?;

    let confidence = parsed.confidence.unwrap_or(f64::NAN);
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(AdvisorError::InvalidConfidence(confidence));
    }

    Ok(AdvisorRecommendation {
        strategy,
        confidence,
        reasoning: parsed.reasoning.unwrap_or_default(),
    })
}

enum AdvisorFailure {
    Failed(AdvisorError),
    Fault(String),
}

/// Advisor-first, heuristic-backed recommendation engine
#[derive(Clone)]
pub struct PolicyEngine {
    advisor: Option<Arc<dyn RecoveryAdvisor>>,
    advisor_config: AdvisorConfig,
    heuristics: HeuristicTable,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("advisor", &self.advisor.as_ref().map(|a| a.name()))
            .field("advisor_enabled", &self.advisor_config.enabled)
            .finish_non_exhaustive()
    }
}

impl PolicyEngine {
    /// Heuristic-only engine
    #[must_use]
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            advisor: None,
            advisor_config: config.advisor.clone(),
            heuristics: HeuristicTable::new(config.heuristics.clone()),
        }
    }

    /// Attach an advisor; it is consulted only if `advisor.enabled` is set
    #[must_use]
    pub fn with_advisor(mut self, advisor: Arc<dyn RecoveryAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Check if an advisor will be consulted
    #[inline]
    #[must_use]
    pub fn advisor_active(&self) -> bool {
        self.advisor_config.enabled && self.advisor.is_some()
    }

    /// Heuristic table in use
    #[inline]
    #[must_use]
    pub fn heuristics(&self) -> &HeuristicTable {
        &self.heuristics
    }

    /// Recommend a strategy for a failure
    pub async fn analyze(&self, context: &RecoveryContext) -> PolicyRecommendation {
        let advisor = match &self.advisor {
            Some(advisor) if self.advisor_config.enabled => Arc::clone(advisor),
            _ => return self.heuristics.recommend(context),
        };

        match self.consult(advisor, context).await {
            Ok(reply) => {
                let confidence = self
                    .heuristics
                    .decayed(reply.confidence, context.previous_attempts);
                tracing::debug!(
                    task_id = %context.task_id,
                    strategy = %reply.strategy,
                    confidence,
                    "advisor recommendation accepted"
                );
                PolicyRecommendation {
                    strategy: reply.strategy,
                    confidence,
                    max_retries: reply.strategy.max_retries(),
                    reasoning: format!("advisor: {}", reply.reasoning),
                    ai_used: true,
                    source: RecommendationSource::Advisor,
                }
            }
            Err(AdvisorFailure::Failed(err)) => {
                tracing::warn!(
                    task_id = %context.task_id,
                    error = %err,
                    "advisor failed, using heuristic fallback"
                );
                let mut fallback = self.heuristics.recommend(context);
                fallback.confidence = (fallback.confidence - self.advisor_config.failure_penalty)
                    .max(self.heuristics.min_confidence());
                fallback.reasoning = format!("{} (advisor unavailable: {err})", fallback.reasoning);
                fallback.source = RecommendationSource::AdvisorFallback;
                fallback
            }
            Err(AdvisorFailure::Fault(detail)) => {
                tracing::error!(
                    task_id = %context.task_id,
                    %detail,
                    "advisor call faulted, using fixed low confidence"
                );
                let mut fallback = self.heuristics.recommend(context);
                fallback.confidence = fallback
                    .confidence
                    .min(self.advisor_config.internal_fault_confidence);
                fallback.reasoning = format!("{} (advisor fault)", fallback.reasoning);
                fallback.source = RecommendationSource::InternalFault;
                fallback
            }
        }
    }

    async fn consult(
        &self,
        advisor: Arc<dyn RecoveryAdvisor>,
        context: &RecoveryContext,
    ) -> Result<AdvisorRecommendation, AdvisorFailure> {
        let request = AdvisorRequest::new(context.clone());
        let timeout = self.advisor_config.timeout();
        let timeout_ms = self.advisor_config.timeout_ms;

        // Own task so a panicking advisor cannot take the caller down
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, advisor.recommend(request)).await {
                Ok(reply) => reply,
                Err(_) => Err(AdvisorError::Timeout { timeout_ms }),
            }
        });

        match handle.await {
            Ok(Ok(raw)) => parse_advisor_reply(&raw).map_err(AdvisorFailure::Failed),
            Ok(Err(err)) => Err(AdvisorFailure::Failed(err)),
            Err(join_err) => Err(AdvisorFailure::Fault(join_err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let rec = parse_advisor_reply(
            r#"{"strategy": "retry_different_agent", "confidence": 0.82, "reasoning": "agent lacks tool"}"#,
        )
        .unwrap();
        assert_eq!(rec.strategy, RecoveryStrategy::RetryDifferentAgent);
        assert!((rec.confidence - 0.82).abs() < f64::EPSILON);
        assert_eq!(rec.reasoning, "agent lacks tool");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Here you go:\n```json\n{\"strategy\": \"LINEAR_BACKOFF\", \"confidence\": 0.7}\n```";
        let rec = parse_advisor_reply(raw).unwrap();
        assert_eq!(rec.strategy, RecoveryStrategy::LinearBackoff);
        assert!(rec.reasoning.is_empty());
    }

    #[test]
    fn rejects_unknown_strategy() {
        let err = parse_advisor_reply(r#"{"strategy": "reboot_the_cluster", "confidence": 0.9}"#)
            .unwrap_err();
        assert!(matches!(err, AdvisorError::InvalidStrategy(s) if s == "reboot_the_cluster"));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let err = parse_advisor_reply(r#"{"strategy": "immediate_retry", "confidence": 1.4}"#)
            .unwrap_err();
        assert!(matches!(err, AdvisorError::InvalidConfidence(_)));

        let missing = parse_advisor_reply(r#"{"strategy": "immediate_retry"}"#).unwrap_err();
        assert!(matches!(missing, AdvisorError::InvalidConfidence(_)));
    }

    #[test]
    fn rejects_prose() {
        let err = parse_advisor_reply("I think you should retry.").unwrap_err();
        assert!(matches!(err, AdvisorError::Malformed(_)));
    }

    #[tokio::test]
    async fn no_advisor_means_heuristic() {
        let engine = PolicyEngine::new(&RecoveryConfig::default());
        let rec = engine
            .analyze(&RecoveryContext::new("t-1", "ws-1", "KeyError: 'x'"))
            .await;
        assert_eq!(rec.source, RecommendationSource::Heuristic);
        assert!(!rec.ai_used);
        assert_eq!(rec.strategy, RecoveryStrategy::AlternativeApproach);
    }
}
