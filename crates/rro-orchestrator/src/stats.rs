//! Aggregate statistics over the rolling history

use rro_core::{RecoveryAnalysisResult, RecoveryDecision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate over the analyses inside the history window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Analyses in the window
    pub total_analyses: usize,
    /// Count per strategy name
    pub strategy_distribution: BTreeMap<String, usize>,
    /// Count per decision name
    pub decision_distribution: BTreeMap<String, usize>,
    /// Share of analyses that used the advisor, 0-100
    pub ai_usage_percentage: f64,
    /// Mean confidence
    pub average_confidence: f64,
    /// Mean analysis wall time
    pub average_duration_ms: f64,
    /// Share of analyses that escalated, 0-1
    pub escalation_rate: f64,
    /// Window the aggregate covers
    pub window_secs: i64,
}

impl RecoveryStats {
    /// Aggregate a slice of results
    #[must_use]
    pub fn from_results(results: &[RecoveryAnalysisResult], window_secs: i64) -> Self {
        let mut stats = Self {
            total_analyses: results.len(),
            window_secs,
            ..Self::default()
        };
        if results.is_empty() {
            return stats;
        }

        let mut ai_used = 0usize;
        let mut escalated = 0usize;
        let mut confidence = 0.0;
        let mut duration = 0.0;

        for r in results {
            *stats
                .strategy_distribution
                .entry(r.strategy.as_str().to_string())
                .or_default() += 1;
            *stats
                .decision_distribution
                .entry(r.decision.as_str().to_string())
                .or_default() += 1;
            if r.ai_used {
                ai_used += 1;
            }
            if r.decision == RecoveryDecision::Escalate {
                escalated += 1;
            }
            confidence += r.confidence_score;
            duration += r.analysis_duration_ms;
        }

        #[allow(clippy::cast_precision_loss)]
        let n = results.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        {
            stats.ai_usage_percentage = ai_used as f64 / n * 100.0;
            stats.escalation_rate = escalated as f64 / n;
        }
        stats.average_confidence = confidence / n;
        stats.average_duration_ms = duration / n;
        stats
    }
}
