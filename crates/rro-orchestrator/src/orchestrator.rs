//! Recovery Orchestrator
//!
//! Facade over the recovery core, on the task-failure hot path:
//! 1. Build a `RecoveryContext` from the failure and the stored task
//! 2. Classifier first, policy engine on a miss
//! 3. Gates: attempt cap (final fallback), retry budget, confidence threshold
//! 4. Backoff delay for retries
//! 5. Append to the rolling history
//! 6. Persist and notify in the background
//!
//! Analysis never fails. A store read error counts as zero prior attempts,
//! sink errors only cost the audit trail.

use crate::history::RecoveryHistory;
use crate::stats::RecoveryStats;
use chrono::Utc;
use rro_core::{
    AnalysisSink, LoggingAnalysisSink, LoggingNotifier, Notification, NotificationSink,
    RecoveryAnalysisResult, RecoveryConfig, RecoveryContext, RecoveryDecision, RecoveryStrategy,
    TaskId, TaskRecord, TaskStore, WorkspaceId,
};
use rro_policy::{BackoffCalculator, FailureClassifier, PolicyEngine};
use std::sync::Arc;
use std::time::Instant;

/// Strategy choice before gates are applied
#[derive(Debug, Clone)]
struct Verdict {
    strategy: RecoveryStrategy,
    confidence: f64,
    budget: u32,
    pattern_id: Option<String>,
    reasoning: String,
    ai_used: bool,
}

/// Recovery analysis service
pub struct RecoveryOrchestrator {
    config: RecoveryConfig,
    store: Arc<dyn TaskStore>,
    classifier: FailureClassifier,
    policy: PolicyEngine,
    backoff: BackoffCalculator,
    history: Arc<RecoveryHistory>,
    analysis_sink: Arc<dyn AnalysisSink>,
    notifier: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("max_attempts", &self.config.max_attempts)
            .field("confidence_threshold", &self.config.confidence_threshold)
            .field("policy", &self.policy)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl RecoveryOrchestrator {
    /// Create orchestrator with the built-in catalog, a heuristic-only
    /// policy engine, and log-only sinks
    #[must_use]
    pub fn new(config: RecoveryConfig, store: Arc<dyn TaskStore>) -> Self {
        Self {
            classifier: FailureClassifier::new(),
            policy: PolicyEngine::new(&config),
            backoff: BackoffCalculator::new(config.backoff),
            history: Arc::new(RecoveryHistory::new(config.history)),
            analysis_sink: Arc::new(LoggingAnalysisSink),
            notifier: Arc::new(LoggingNotifier),
            store,
            config,
        }
    }

    /// With policy engine (e.g. one carrying an advisor)
    #[must_use]
    pub fn with_policy_engine(mut self, policy: PolicyEngine) -> Self {
        self.policy = policy;
        self
    }

    /// With classifier catalog
    #[must_use]
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// With audit sink
    #[must_use]
    pub fn with_analysis_sink(mut self, sink: Arc<dyn AnalysisSink>) -> Self {
        self.analysis_sink = sink;
        self
    }

    /// With notification sink
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Rolling history
    #[inline]
    #[must_use]
    pub fn history(&self) -> &RecoveryHistory {
        &self.history
    }

    /// Task store in use
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Analyse one failure and decide its recovery
    #[tracing::instrument(skip(self, error_message), fields(task_id = %task_id, workspace_id = %workspace_id))]
    pub async fn analyze_task_recovery(
        &self,
        task_id: &TaskId,
        workspace_id: &WorkspaceId,
        error_message: &str,
        error_type: Option<&str>,
        task_name: Option<&str>,
    ) -> RecoveryAnalysisResult {
        let task = self.load_task(task_id).await;
        let context = Self::build_context(
            task_id,
            workspace_id,
            error_message,
            error_type,
            task_name,
            task.as_ref(),
        );
        self.analyze_context(context).await
    }

    /// Analyse only if automatic recovery is worth attempting.
    ///
    /// Returns `(false, None)` without analysing once the task has used the
    /// global attempt cap. Otherwise returns the analysis, with `true` only
    /// if its confidence meets the threshold and it does not escalate.
    #[tracing::instrument(skip(self, error_message), fields(task_id = %task_id))]
    pub async fn should_attempt_recovery(
        &self,
        task_id: &TaskId,
        workspace_id: &WorkspaceId,
        error_message: &str,
        error_type: Option<&str>,
        task_name: Option<&str>,
    ) -> (bool, Option<RecoveryAnalysisResult>) {
        let task = self.load_task(task_id).await;
        let attempts = task.as_ref().map_or(0, |t| t.retry_count);
        if attempts >= self.config.max_attempts {
            tracing::info!(
                attempts,
                max_attempts = self.config.max_attempts,
                "attempt cap reached, no automatic recovery"
            );
            return (false, None);
        }

        let context = Self::build_context(
            task_id,
            workspace_id,
            error_message,
            error_type,
            task_name,
            task.as_ref(),
        );
        let result = self.analyze_context(context).await;
        let proceed = result.confidence_score >= self.config.confidence_threshold
            && result.decision != RecoveryDecision::Escalate;
        (proceed, Some(result))
    }

    /// Statistics over the history window
    #[must_use]
    pub fn get_recovery_stats(&self) -> RecoveryStats {
        RecoveryStats::from_results(&self.history.snapshot(), self.history.window_secs())
    }

    async fn load_task(&self, task_id: &TaskId) -> Option<TaskRecord> {
        match self.store.get_task(task_id).await {
            Ok(task) => task,
            Err(err) => {
                tracing::warn!(%task_id, error = %err, "task read failed, assuming no prior attempts");
                None
            }
        }
    }

    fn build_context(
        task_id: &TaskId,
        workspace_id: &WorkspaceId,
        error_message: &str,
        error_type: Option<&str>,
        task_name: Option<&str>,
        task: Option<&TaskRecord>,
    ) -> RecoveryContext {
        let mut context = RecoveryContext::new(task_id.clone(), workspace_id.clone(), error_message);
        if let Some(error_type) = error_type {
            context = context.with_error_type(error_type);
        }
        if let Some(name) = task_name {
            context = context.with_task_name(name);
        }
        if let Some(task) = task {
            context = context.with_task(task);
        }
        context
    }

    async fn analyze_context(&self, context: RecoveryContext) -> RecoveryAnalysisResult {
        let started = Instant::now();
        let verdict = self.choose(&context).await;
        let attempts = context.previous_attempts;

        let budget = verdict.budget.min(self.config.max_attempts);
        let mut strategy = verdict.strategy;
        let mut decision = strategy.default_decision();
        let mut reasoning = verdict.reasoning;

        // At the cap the executor completes the task with its final fallback
        if attempts >= self.config.max_attempts {
            strategy = RecoveryStrategy::SkipWithFallback;
            decision = RecoveryDecision::Skip;
            reasoning = format!(
                "attempt cap of {} reached after {attempts} attempt(s), final fallback applies; {reasoning}",
                self.config.max_attempts
            );
        } else if decision == RecoveryDecision::Retry {
            if attempts.saturating_add(1) > budget {
                decision = RecoveryDecision::Escalate;
                reasoning = format!(
                    "{reasoning}; retry budget of {budget} exhausted after {attempts} attempt(s)"
                );
            } else if verdict.confidence < self.config.confidence_threshold {
                decision = RecoveryDecision::Escalate;
                reasoning = format!(
                    "{reasoning}; confidence {:.2} below threshold {:.2}",
                    verdict.confidence, self.config.confidence_threshold
                );
            }
        }

        let delay = if decision == RecoveryDecision::Retry {
            self.backoff.delay(strategy, attempts.saturating_add(1))
        } else {
            0
        };

        let result = RecoveryAnalysisResult {
            analysis_id: ulid::Ulid::new().to_string(),
            task_id: context.task_id,
            workspace_id: context.workspace_id,
            decision,
            strategy,
            confidence_score: verdict.confidence,
            recommended_delay_seconds: delay,
            max_retries: budget,
            previous_attempts: attempts,
            pattern_id: verdict.pattern_id,
            reasoning,
            ai_used: verdict.ai_used,
            analysis_duration_ms: started.elapsed().as_secs_f64() * 1_000.0,
            timestamp: Utc::now(),
        };

        self.history.append(result.clone());
        tracing::info!(
            decision = %result.decision,
            strategy = %result.strategy,
            confidence = result.confidence_score,
            delay_seconds = result.recommended_delay_seconds,
            attempts,
            "recovery analysed"
        );

        self.dispatch(&result);
        result
    }

    async fn choose(&self, context: &RecoveryContext) -> Verdict {
        if let Some(pattern) = self.classifier.classify(&context.error_message, context) {
            return Verdict {
                strategy: pattern.default_strategy,
                confidence: pattern.default_confidence,
                budget: pattern.retry_budget(),
                pattern_id: Some(pattern.pattern_id.clone()),
                reasoning: format!("matched pattern {}: {}", pattern.pattern_id, pattern.description),
                ai_used: false,
            };
        }

        let rec = self.policy.analyze(context).await;
        Verdict {
            strategy: rec.strategy,
            confidence: rec.confidence,
            budget: rec.max_retries,
            pattern_id: None,
            reasoning: rec.reasoning,
            ai_used: rec.ai_used,
        }
    }

    fn dispatch(&self, result: &RecoveryAnalysisResult) {
        let sink = Arc::clone(&self.analysis_sink);
        let record = result.clone();
        tokio::spawn(async move {
            if let Err(err) = sink.record(&record).await {
                tracing::warn!(
                    analysis_id = %record.analysis_id,
                    error = %err,
                    "analysis not persisted"
                );
            }
        });

        if result.decision == RecoveryDecision::Escalate {
            let notifier = Arc::clone(&self.notifier);
            let notification = Notification::Escalation {
                task_id: result.task_id.clone(),
                workspace_id: result.workspace_id.clone(),
                reasoning: result.reasoning.clone(),
            };
            tokio::spawn(async move {
                if let Err(err) = notifier.notify(&notification).await {
                    tracing::warn!(error = %err, "escalation notice not delivered");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rro_core::InMemoryTaskStore;

    fn orchestrator(config: RecoveryConfig) -> RecoveryOrchestrator {
        RecoveryOrchestrator::new(config, Arc::new(InMemoryTaskStore::new()))
    }

    #[tokio::test]
    async fn unknown_task_counts_as_first_attempt() {
        let orch = orchestrator(RecoveryConfig::default());
        let result = orch
            .analyze_task_recovery(&"t-x".into(), &"ws-1".into(), "KeyError: 'a'", None, None)
            .await;
        assert_eq!(result.previous_attempts, 0);
        assert_eq!(result.decision, RecoveryDecision::Retry);
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test]
    async fn low_confidence_retry_escalates() {
        let orch = orchestrator(RecoveryConfig::default().with_confidence_threshold(0.99));
        let result = orch
            .analyze_task_recovery(&"t-x".into(), &"ws-1".into(), "KeyError: 'a'", None, None)
            .await;
        assert_eq!(result.decision, RecoveryDecision::Escalate);
        assert!(result.reasoning.contains("below threshold"));
        assert_eq!(result.recommended_delay_seconds, 0);
    }
}
