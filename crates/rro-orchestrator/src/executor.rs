//! Recovery Strategy Executor
//!
//! Applies an analysis to the stored task:
//!
//! ```text
//! Failed --Retry----------> Pending (same agent, next_attempt_at = now + delay)
//!        --Retry(agent)---> Pending (agent cleared, previous agent excluded)
//!        --Decompose------> Completed (parent) + N Pending children
//!        --Skip-----------> Completed at partial credit, fallback marker
//!        --Escalate-------> Escalated (terminal)
//! any non-terminal, retry_count >= max_attempts --> Completed at final-fallback credit
//! ```
//!
//! The final fallback bypasses transition checks and retries its write, so a
//! task that has used every attempt can always be taken off the queue.

use crate::orchestrator::RecoveryOrchestrator;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rro_core::{
    validate_transition, AgentId, ExecutorConfig, ExecutorError, LoggingNotifier, LoggingStatusSink,
    Notification, NotificationSink, RecoveryAnalysisResult, RecoveryConfig, RecoveryDecision,
    RecoveryStrategy, StoreError, TaskId, TaskRecord, TaskStatus, TaskStore, WorkspaceId,
    WorkspaceStatus, WorkspaceStatusSink,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Metadata key holding the last error message of a failed task
pub const LAST_ERROR_KEY: &str = "last_error";
/// Metadata key holding the last error type of a failed task
pub const LAST_ERROR_TYPE_KEY: &str = "last_error_type";
/// Metadata key listing agents a task must not be given to again
pub const EXCLUDED_AGENTS_KEY: &str = "excluded_agents";
/// Metadata key numbering a subtask within its decomposed parent
pub const DECOMPOSITION_PART_KEY: &str = "decomposition_part";

/// What happened to a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Back in the queue with the same agent
    RequeuedForRetry {
        /// Seconds until the next attempt may start
        delay_seconds: u64,
    },
    /// Back in the queue without an agent
    RequeuedWithNewAgent {
        /// Agent that ran the failed attempt
        excluded_agent: Option<AgentId>,
    },
    /// Parent completed, children created
    SplitIntoSubtasks {
        /// New child tasks
        children: Vec<TaskId>,
    },
    /// Completed with partial credit
    CompletedWithFallback {
        /// Credit given
        completion_percentage: u8,
    },
    /// Completed with minimal credit after every attempt was used
    CompletedWithFinalFallback {
        /// Credit given
        completion_percentage: u8,
    },
    /// Handed to a human
    Escalated,
}

impl RecoveryOutcome {
    /// Whether the task left the failed state without a human
    #[inline]
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        !matches!(self, Self::Escalated)
    }
}

/// Result of recovering every failed task of a workspace
#[derive(Debug, Clone)]
pub struct WorkspaceRecoveryReport {
    /// Workspace
    pub workspace_id: WorkspaceId,
    /// Failed tasks found
    pub total: usize,
    /// Tasks recovered without a human
    pub recovered: usize,
    /// Tasks escalated
    pub escalated: usize,
    /// Per-task outcomes
    pub outcomes: Vec<(TaskId, RecoveryOutcome)>,
    /// Per-task executor errors
    pub errors: Vec<(TaskId, String)>,
    /// Status written for the workspace
    pub status: WorkspaceStatus,
}

/// Applies recovery decisions to task records
pub struct RecoveryExecutor {
    config: ExecutorConfig,
    max_attempts: u32,
    confidence_threshold: f64,
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn NotificationSink>,
    status_sink: Arc<dyn WorkspaceStatusSink>,
}

impl std::fmt::Debug for RecoveryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryExecutor")
            .field("config", &self.config)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl RecoveryExecutor {
    /// Create executor with log-only sinks
    #[must_use]
    pub fn new(config: &RecoveryConfig, store: Arc<dyn TaskStore>) -> Self {
        Self {
            config: config.executor,
            max_attempts: config.max_attempts,
            confidence_threshold: config.confidence_threshold,
            store,
            notifier: Arc::new(LoggingNotifier),
            status_sink: Arc::new(LoggingStatusSink),
        }
    }

    /// With notification sink
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// With workspace status sink
    #[must_use]
    pub fn with_status_sink(mut self, sink: Arc<dyn WorkspaceStatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    /// Apply an analysis to its task
    #[tracing::instrument(skip(self, analysis), fields(decision = %analysis.decision, strategy = %analysis.strategy))]
    pub async fn execute(
        &self,
        task_id: &TaskId,
        analysis: &RecoveryAnalysisResult,
    ) -> Result<RecoveryOutcome, ExecutorError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| ExecutorError::TaskNotFound(task_id.clone()))?;

        if !task.status.is_terminal() && task.retry_count >= self.max_attempts {
            return self.final_fallback(task).await;
        }

        let decision = if analysis.confidence_score < self.confidence_threshold {
            RecoveryDecision::Escalate
        } else {
            analysis.decision
        };

        match decision {
            RecoveryDecision::Retry => self.requeue(task, analysis).await,
            RecoveryDecision::Decompose => self.decompose(task, analysis).await,
            RecoveryDecision::Skip => self.skip(task, analysis).await,
            RecoveryDecision::Escalate => self.escalate(task, analysis).await,
        }
    }

    /// Analyse a failed task with its recorded error and apply the result
    pub async fn recover_failed_task(
        &self,
        orchestrator: &RecoveryOrchestrator,
        task: &TaskRecord,
    ) -> Result<RecoveryOutcome, ExecutorError> {
        let error_message = task
            .metadata
            .get(LAST_ERROR_KEY)
            .and_then(Value::as_str)
            .unwrap_or("unknown failure");
        let error_type = task.metadata.get(LAST_ERROR_TYPE_KEY).and_then(Value::as_str);

        let analysis = orchestrator
            .analyze_task_recovery(
                &task.id,
                &task.workspace_id,
                error_message,
                error_type,
                Some(task.name.as_str()),
            )
            .await;
        self.execute(&task.id, &analysis).await
    }

    /// Recover every failed task of a workspace concurrently, then write the
    /// workspace status
    #[tracing::instrument(skip(self, orchestrator))]
    pub async fn recover_workspace(
        &self,
        orchestrator: &RecoveryOrchestrator,
        workspace_id: &WorkspaceId,
    ) -> Result<WorkspaceRecoveryReport, ExecutorError> {
        let failed: Vec<TaskRecord> = self
            .store
            .list_workspace_tasks(workspace_id)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();

        let results = join_all(
            failed
                .iter()
                .map(|task| self.recover_failed_task(orchestrator, task)),
        )
        .await;

        let mut outcomes = Vec::with_capacity(failed.len());
        let mut errors = Vec::new();
        for (task, result) in failed.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push((task.id.clone(), outcome)),
                Err(err) => {
                    tracing::error!(task_id = %task.id, error = %err, "task recovery failed");
                    errors.push((task.id.clone(), err.to_string()));
                }
            }
        }

        let total = failed.len();
        let recovered = outcomes.iter().filter(|(_, o)| o.is_recovered()).count();
        let escalated = outcomes.len() - recovered;
        let status = if recovered == total {
            WorkspaceStatus::Active
        } else if recovered > 0 {
            WorkspaceStatus::Degraded
        } else {
            WorkspaceStatus::AutoRecovering
        };

        if let Err(err) = self.status_sink.set_status(workspace_id, status).await {
            tracing::warn!(%workspace_id, error = %err, "workspace status not written");
        }
        if status != WorkspaceStatus::Active {
            self.notify(Notification::WorkspaceStatusChanged {
                workspace_id: workspace_id.clone(),
                status,
                recovered,
                total,
            });
        }

        tracing::info!(total, recovered, escalated, %status, "workspace recovery finished");
        Ok(WorkspaceRecoveryReport {
            workspace_id: workspace_id.clone(),
            total,
            recovered,
            escalated,
            outcomes,
            errors,
            status,
        })
    }

    async fn requeue(
        &self,
        mut task: TaskRecord,
        analysis: &RecoveryAnalysisResult,
    ) -> Result<RecoveryOutcome, ExecutorError> {
        validate_transition(task.status, TaskStatus::Pending)?;
        let now = Utc::now();
        let delay = analysis.recommended_delay_seconds;

        task.status = TaskStatus::Pending;
        task.retry_count = task.retry_count.saturating_add(1);
        task.next_attempt_at = Some(
            now.checked_add_signed(seconds(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        task.updated_at = now;
        annotate(&mut task, analysis);

        let outcome = match analysis.strategy {
            RecoveryStrategy::RetryDifferentAgent => {
                let excluded_agent = task.agent_id.take();
                if let Some(agent) = &excluded_agent {
                    exclude_agent(&mut task, agent);
                }
                RecoveryOutcome::RequeuedWithNewAgent { excluded_agent }
            }
            RecoveryStrategy::ContextReconstruction | RecoveryStrategy::AlternativeApproach => {
                task.metadata
                    .insert("recovery_hint".into(), Value::String(analysis.reasoning.clone()));
                RecoveryOutcome::RequeuedForRetry { delay_seconds: delay }
            }
            _ => RecoveryOutcome::RequeuedForRetry { delay_seconds: delay },
        };

        let task_id = task.id.clone();
        self.store.update_task(task).await?;
        tracing::info!(%task_id, delay_seconds = delay, "task requeued");
        Ok(outcome)
    }

    async fn decompose(
        &self,
        mut task: TaskRecord,
        analysis: &RecoveryAnalysisResult,
    ) -> Result<RecoveryOutcome, ExecutorError> {
        validate_transition(task.status, TaskStatus::Completed)?;
        let n = self.config.decomposition_subtasks.max(1);

        // Parts left behind by an earlier run whose parent update failed
        let mut parts: BTreeMap<usize, TaskId> = self
            .store
            .list_workspace_tasks(&task.workspace_id)
            .await?
            .into_iter()
            .filter(|t| t.parent_id.as_ref() == Some(&task.id))
            .filter_map(|t| {
                let part = t.metadata.get(DECOMPOSITION_PART_KEY)?.as_u64()?;
                Some((usize::try_from(part).ok()?, t.id))
            })
            .collect();
        if !parts.is_empty() {
            tracing::info!(task_id = %task.id, reused = parts.len(), "reusing existing subtasks");
        }

        for part in 1..=n {
            if parts.contains_key(&part) {
                continue;
            }
            let mut child = TaskRecord::new(
                TaskId::generate(),
                task.workspace_id.clone(),
                format!("{} (part {part}/{n})", task.name),
            );
            child.goal_id.clone_from(&task.goal_id);
            child.parent_id = Some(task.id.clone());
            child.description = Some(format!(
                "Part {part} of {n} of: {}",
                task.description.as_deref().unwrap_or(&task.name)
            ));
            child
                .metadata
                .insert("decomposed_from".into(), Value::String(task.id.to_string()));
            child
                .metadata
                .insert(DECOMPOSITION_PART_KEY.into(), json!(part));
            parts.insert(part, child.id.clone());
            self.store.create_task(child).await?;
        }
        let children: Vec<TaskId> = parts.into_values().collect();

        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.updated_at = now;
        task.next_attempt_at = None;
        task.result = Some(json!({
            "decomposed": true,
            "subtasks": children.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }));
        annotate(&mut task, analysis);
        task.metadata
            .insert("completed_by".into(), Value::String("decomposition".into()));

        let task_id = task.id.clone();
        self.store.update_task(task).await?;
        tracing::info!(%task_id, subtasks = n, "task decomposed");
        Ok(RecoveryOutcome::SplitIntoSubtasks { children })
    }

    async fn skip(
        &self,
        mut task: TaskRecord,
        analysis: &RecoveryAnalysisResult,
    ) -> Result<RecoveryOutcome, ExecutorError> {
        validate_transition(task.status, TaskStatus::Completed)?;
        let pct = self.config.skip_completion_percentage;
        complete_with(&mut task, pct, json!({
            "fallback": true,
            "strategy": analysis.strategy.as_str(),
            "reasoning": analysis.reasoning,
        }));
        annotate(&mut task, analysis);

        let task_id = task.id.clone();
        self.store.update_task(task).await?;
        tracing::info!(%task_id, completion_percentage = pct, "task completed with fallback");
        Ok(RecoveryOutcome::CompletedWithFallback {
            completion_percentage: pct,
        })
    }

    async fn escalate(
        &self,
        mut task: TaskRecord,
        analysis: &RecoveryAnalysisResult,
    ) -> Result<RecoveryOutcome, ExecutorError> {
        validate_transition(task.status, TaskStatus::Escalated)?;
        task.status = TaskStatus::Escalated;
        task.next_attempt_at = None;
        task.updated_at = Utc::now();
        annotate(&mut task, analysis);
        task.metadata.insert(
            "escalation_reason".into(),
            Value::String(analysis.reasoning.clone()),
        );

        let task_id = task.id.clone();
        self.store.update_task(task).await?;
        tracing::warn!(%task_id, "task escalated");
        Ok(RecoveryOutcome::Escalated)
    }

    async fn final_fallback(&self, task: TaskRecord) -> Result<RecoveryOutcome, ExecutorError> {
        let pct = self.config.final_fallback_completion_percentage;
        let attempts = self.config.final_fallback_write_attempts.max(1);
        let task_id = task.id.clone();

        let mut last_err: Option<StoreError> = None;
        for write in 1..=attempts {
            let mut update = task.clone();
            complete_with(&mut update, pct, json!({
                "final_fallback": true,
                "attempts": task.retry_count,
            }));
            update
                .metadata
                .insert("completed_by".into(), Value::String("final_fallback".into()));

            match self.store.update_task(update).await {
                Ok(()) => {
                    tracing::warn!(%task_id, attempts = task.retry_count, completion_percentage = pct, "final fallback applied");
                    return Ok(RecoveryOutcome::CompletedWithFinalFallback {
                        completion_percentage: pct,
                    });
                }
                Err(err) => {
                    tracing::warn!(%task_id, write, error = %err, "final fallback write failed");
                    last_err = Some(err);
                    if write < attempts {
                        tokio::time::sleep(Duration::from_millis(10 * u64::from(write))).await;
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| StoreError::Unavailable("no write attempted".into()));
        tracing::error!(%task_id, error = %err, "final fallback could not be written");
        Err(err.into())
    }

    fn notify(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(err) = notifier.notify(&notification).await {
                tracing::warn!(error = %err, "notification not delivered");
            }
        });
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn complete_with(task: &mut TaskRecord, pct: u8, result: Value) {
    let now = Utc::now();
    task.status = TaskStatus::Completed;
    task.completion_percentage = Some(pct.min(100));
    task.result = Some(result);
    task.next_attempt_at = None;
    task.completed_at = Some(now);
    task.updated_at = now;
}

fn annotate(task: &mut TaskRecord, analysis: &RecoveryAnalysisResult) {
    task.metadata.insert(
        "recovery_strategy".into(),
        Value::String(analysis.strategy.as_str().into()),
    );
    task.metadata.insert(
        "last_analysis_id".into(),
        Value::String(analysis.analysis_id.clone()),
    );
}

fn exclude_agent(task: &mut TaskRecord, agent: &AgentId) {
    let entry = task
        .metadata
        .entry(EXCLUDED_AGENTS_KEY)
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(list) = entry {
        let value = Value::String(agent.to_string());
        if !list.contains(&value) {
            list.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_agents_accumulate_without_duplicates() {
        let mut task = TaskRecord::new("t-1", "ws-1", "x");
        exclude_agent(&mut task, &AgentId::from("a-1"));
        exclude_agent(&mut task, &AgentId::from("a-2"));
        exclude_agent(&mut task, &AgentId::from("a-1"));
        assert_eq!(task.metadata[EXCLUDED_AGENTS_KEY], json!(["a-1", "a-2"]));
    }

    #[test]
    fn only_escalation_is_unrecovered() {
        assert!(!RecoveryOutcome::Escalated.is_recovered());
        assert!(RecoveryOutcome::CompletedWithFinalFallback {
            completion_percentage: 60
        }
        .is_recovered());
    }
}
