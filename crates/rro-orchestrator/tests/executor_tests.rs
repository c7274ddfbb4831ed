//! Functional tests for the strategy executor.
//!
//! Each test runs a real analysis through the orchestrator and applies it to
//! the in-memory store, then checks the stored task.

use pretty_assertions::assert_eq;
use rro_core::{
    ExecutorError, HeuristicConfig, InMemoryTaskStore, Notification, RecoveryConfig,
    RecoveryDecision, RecoveryStrategy, TaskId, TaskRecord, TaskStatus, TaskStore, WorkspaceStatus,
};
use rro_orchestrator::{
    RecoveryExecutor, RecoveryOrchestrator, RecoveryOutcome, DECOMPOSITION_PART_KEY,
    EXCLUDED_AGENTS_KEY, LAST_ERROR_KEY, LAST_ERROR_TYPE_KEY,
};
use rro_test_utils::{
    failed_task, store_with, wait_until, workspace, FlakyStore, RecordingNotifier,
    RecordingStatusSink,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<InMemoryTaskStore>,
    notifier: Arc<RecordingNotifier>,
    orchestrator: RecoveryOrchestrator,
    executor: RecoveryExecutor,
}

impl Harness {
    fn new(config: RecoveryConfig, tasks: Vec<TaskRecord>) -> Self {
        let store = store_with(tasks);
        let notifier = RecordingNotifier::new();
        Self {
            orchestrator: RecoveryOrchestrator::new(config.clone(), store.clone())
                .with_notifier(notifier.clone()),
            executor: RecoveryExecutor::new(&config, store.clone()),
            notifier,
            store,
        }
    }

    async fn recover(&self, id: &str, error: &str, error_type: Option<&str>) -> RecoveryOutcome {
        let task_id = TaskId::from(id);
        let analysis = self
            .orchestrator
            .analyze_task_recovery(&task_id, &workspace(), error, error_type, None)
            .await;
        self.executor.execute(&task_id, &analysis).await.unwrap()
    }

    fn task(&self, id: &str) -> TaskRecord {
        self.store.snapshot(&TaskId::from(id)).unwrap()
    }

    async fn run_and_fail(&self, id: &str) {
        let mut task = self.task(id);
        task.status = TaskStatus::InProgress;
        self.store.update_task(task.clone()).await.unwrap();
        task.status = TaskStatus::Failed;
        self.store.update_task(task).await.unwrap();
    }
}

fn with_error(mut task: TaskRecord, message: &str, error_type: Option<&str>) -> TaskRecord {
    task.metadata.insert(LAST_ERROR_KEY.into(), json!(message));
    if let Some(t) = error_type {
        task.metadata.insert(LAST_ERROR_TYPE_KEY.into(), json!(t));
    }
    task
}

/// Tenet: a task failing with an unclassified error is retried until the
/// attempt cap, then taken off the queue at final-fallback credit.
#[tokio::test]
async fn repeated_unclassified_failure_ends_in_final_fallback() {
    let config = RecoveryConfig::default().with_heuristics(HeuristicConfig {
        decompose_after_attempts: 100,
        skip_after_attempts: 100,
        ..HeuristicConfig::default()
    });
    let h = Harness::new(config, vec![failed_task("t-e2e", 0)]);

    for attempt in 0..5 {
        let outcome = h.recover("t-e2e", "KeyError: 'ledger_id'", None).await;
        assert!(
            matches!(outcome, RecoveryOutcome::RequeuedForRetry { .. }),
            "attempt {attempt}: {outcome:?}"
        );
        let task = h.task("t-e2e");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, attempt + 1);
        assert_eq!(task.metadata["recovery_strategy"], json!("alternative_approach"));
        h.run_and_fail("t-e2e").await;
    }

    let analysis = h
        .orchestrator
        .analyze_task_recovery(&"t-e2e".into(), &workspace(), "KeyError: 'ledger_id'", None, None)
        .await;
    assert_eq!(analysis.decision, RecoveryDecision::Skip);
    assert!(analysis.reasoning.contains("attempt cap"), "{}", analysis.reasoning);
    let outcome = h.executor.execute(&"t-e2e".into(), &analysis).await.unwrap();
    assert_eq!(
        outcome,
        RecoveryOutcome::CompletedWithFinalFallback {
            completion_percentage: 60
        }
    );

    // Nothing about this run should reach a human
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.notifier.escalations(), 0);
    assert!(h
        .orchestrator
        .history()
        .snapshot()
        .iter()
        .all(|r| r.decision != RecoveryDecision::Escalate));
    let stats = h.orchestrator.get_recovery_stats();
    assert!(!stats.decision_distribution.contains_key("escalate"));
    assert!(stats.escalation_rate.abs() < f64::EPSILON);

    let task = h.task("t-e2e");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completion_percentage, Some(60));
    assert!(task.next_attempt_at.is_none());
    assert_eq!(task.result.unwrap()["final_fallback"], json!(true));

    let (proceed, result) = h
        .orchestrator
        .should_attempt_recovery(&"t-e2e".into(), &workspace(), "KeyError", None, None)
        .await;
    assert!(!proceed);
    assert!(result.is_none());
}

/// Tenet: reassignment clears the agent and remembers it as excluded.
#[tokio::test]
async fn retry_different_agent_clears_assignment() {
    let h = Harness::new(RecoveryConfig::default(), vec![failed_task("t-1", 0)]);

    let outcome = h.recover("t-1", "agent lacks skill: sql", None).await;

    assert_eq!(
        outcome,
        RecoveryOutcome::RequeuedWithNewAgent {
            excluded_agent: Some("agent-1".into())
        }
    );
    let task = h.task("t-1");
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.agent_id.is_none());
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.metadata[EXCLUDED_AGENTS_KEY], json!(["agent-1"]));
}

/// Tenet: backoff retries carry their next attempt time.
#[tokio::test]
async fn backoff_retry_schedules_next_attempt() {
    let h = Harness::new(RecoveryConfig::default(), vec![failed_task("t-1", 1)]);
    let before = chrono::Utc::now();

    let outcome = h.recover("t-1", "connection reset by peer", None).await;

    assert_eq!(outcome, RecoveryOutcome::RequeuedForRetry { delay_seconds: 10 });
    let next = h.task("t-1").next_attempt_at.unwrap();
    assert!(next >= before + chrono::Duration::seconds(10));
}

/// Tenet: context reconstruction keeps the agent and leaves a hint.
#[tokio::test]
async fn context_reconstruction_annotates_task() {
    let h = Harness::new(RecoveryConfig::default(), vec![failed_task("t-1", 0)]);

    h.recover("t-1", "missing deliverable from upstream", None).await;

    let task = h.task("t-1");
    assert_eq!(task.agent_id.as_ref().map(|a| a.as_str()), Some("agent-1"));
    assert_eq!(task.metadata["recovery_strategy"], json!("context_reconstruction"));
    assert!(task.metadata.contains_key("recovery_hint"));
}

/// Tenet: decomposition completes the parent and links the children.
#[tokio::test]
async fn decomposition_spawns_linked_children() {
    let h = Harness::new(RecoveryConfig::default(), vec![failed_task("t-1", 2)]);

    let outcome = h.recover("t-1", "KeyError: 'x'", None).await;

    let RecoveryOutcome::SplitIntoSubtasks { children } = outcome else {
        panic!("expected decomposition, got {outcome:?}");
    };
    assert_eq!(children.len(), 3);
    for child_id in &children {
        let child = h.store.snapshot(child_id).unwrap();
        assert_eq!(child.parent_id.as_ref().map(|p| p.as_str()), Some("t-1"));
        assert_eq!(child.workspace_id, workspace());
        assert_eq!(child.goal_id, h.task("t-1").goal_id);
        assert_eq!(child.status, TaskStatus::Pending);
    }
    let parent = h.task("t-1");
    assert_eq!(parent.status, TaskStatus::Completed);
    assert_eq!(parent.metadata["completed_by"], json!("decomposition"));
}

/// Tenet: rerunning a decomposition whose parent write failed reuses the
/// subtasks already created.
#[tokio::test]
async fn decomposition_rerun_reuses_existing_children() {
    let config = RecoveryConfig::default();
    let inner = store_with(vec![failed_task("t-1", 2)]);
    let flaky = FlakyStore::new(inner.clone(), 0, 1);
    let orchestrator = RecoveryOrchestrator::new(config.clone(), inner.clone());
    let executor = RecoveryExecutor::new(&config, flaky);

    let analysis = orchestrator
        .analyze_task_recovery(&"t-1".into(), &workspace(), "KeyError: 'x'", None, None)
        .await;
    assert_eq!(analysis.strategy, RecoveryStrategy::DecomposeIntoSubtasks);

    let err = executor.execute(&"t-1".into(), &analysis).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Store(_)));
    assert_eq!(inner.snapshot(&"t-1".into()).unwrap().status, TaskStatus::Failed);
    assert_eq!(inner.len(), 4);

    let outcome = executor.execute(&"t-1".into(), &analysis).await.unwrap();
    let RecoveryOutcome::SplitIntoSubtasks { children } = outcome else {
        panic!("expected decomposition, got {outcome:?}");
    };
    assert_eq!(children.len(), 3);
    assert_eq!(inner.len(), 4);
    for (part, child_id) in children.iter().enumerate() {
        let child = inner.snapshot(child_id).unwrap();
        assert_eq!(child.parent_id.as_ref().map(|p| p.as_str()), Some("t-1"));
        assert_eq!(child.metadata[DECOMPOSITION_PART_KEY], json!(part + 1));
    }
    let parent = inner.snapshot(&"t-1".into()).unwrap();
    assert_eq!(parent.status, TaskStatus::Completed);
    let listed: Vec<String> = children.iter().map(ToString::to_string).collect();
    assert_eq!(parent.result.unwrap()["subtasks"], json!(listed));
}

/// Tenet: skipping completes at partial credit with a fallback marker.
#[tokio::test]
async fn skip_completes_with_partial_credit() {
    let h = Harness::new(RecoveryConfig::default(), vec![failed_task("t-1", 3)]);

    let outcome = h.recover("t-1", "KeyError: 'x'", None).await;

    assert_eq!(
        outcome,
        RecoveryOutcome::CompletedWithFallback {
            completion_percentage: 80
        }
    );
    let task = h.task("t-1");
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.completion_percentage, Some(80));
    assert_eq!(task.result.unwrap()["fallback"], json!(true));
}

/// Tenet: escalation is terminal.
#[tokio::test]
async fn escalation_is_terminal() {
    let h = Harness::new(RecoveryConfig::default(), vec![failed_task("t-1", 0)]);

    let outcome = h.recover("t-1", "boom", Some("ImportError")).await;

    assert_eq!(outcome, RecoveryOutcome::Escalated);
    let task = h.task("t-1");
    assert_eq!(task.status, TaskStatus::Escalated);
    assert!(task.metadata.contains_key("escalation_reason"));
}

/// Tenet: finished tasks are not re-queued.
#[tokio::test]
async fn terminal_task_is_rejected() {
    let done = TaskRecord::new("t-1", "ws-test", "done").completed_at(chrono::Utc::now());
    let h = Harness::new(RecoveryConfig::default(), vec![done]);
    let analysis = h
        .orchestrator
        .analyze_task_recovery(&"t-1".into(), &workspace(), "connection reset", None, None)
        .await;
    assert_eq!(analysis.decision, RecoveryDecision::Retry);

    let err = h.executor.execute(&"t-1".into(), &analysis).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Transition(_)));
    assert!(!err.is_retryable());
}

/// Tenet: unknown tasks are reported, not invented.
#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = Harness::new(RecoveryConfig::default(), vec![]);
    let analysis = h
        .orchestrator
        .analyze_task_recovery(&"ghost".into(), &workspace(), "boom", None, None)
        .await;

    let err = h.executor.execute(&"ghost".into(), &analysis).await.unwrap_err();
    assert!(matches!(err, ExecutorError::TaskNotFound(_)));
}

/// Tenet: the final fallback survives transient write failures.
#[tokio::test]
async fn final_fallback_retries_its_write() {
    let config = RecoveryConfig::default();
    let inner = store_with(vec![failed_task("t-1", 5)]);
    let flaky = FlakyStore::new(inner.clone(), 0, 2);
    let orchestrator = RecoveryOrchestrator::new(config.clone(), inner.clone());
    let executor = RecoveryExecutor::new(&config, flaky);

    let analysis = orchestrator
        .analyze_task_recovery(&"t-1".into(), &workspace(), "KeyError", None, None)
        .await;
    let outcome = executor.execute(&"t-1".into(), &analysis).await.unwrap();

    assert!(matches!(outcome, RecoveryOutcome::CompletedWithFinalFallback { .. }));
    assert_eq!(inner.snapshot(&"t-1".into()).unwrap().status, TaskStatus::Completed);
}

/// Tenet: a store that never accepts the write surfaces a store error.
#[tokio::test]
async fn final_fallback_gives_up_after_configured_writes() {
    let config = RecoveryConfig::default();
    let inner = store_with(vec![failed_task("t-1", 5)]);
    let flaky = FlakyStore::new(inner.clone(), 0, 10);
    let orchestrator = RecoveryOrchestrator::new(config.clone(), inner.clone());
    let executor = RecoveryExecutor::new(&config, flaky);

    let analysis = orchestrator
        .analyze_task_recovery(&"t-1".into(), &workspace(), "KeyError", None, None)
        .await;
    let err = executor.execute(&"t-1".into(), &analysis).await.unwrap_err();

    assert!(matches!(err, ExecutorError::Store(_)));
    assert!(err.is_retryable());
}

/// Tenet: a partially recovered workspace is degraded and announced.
#[tokio::test]
async fn partial_workspace_recovery_degrades() {
    let notifier = RecordingNotifier::new();
    let statuses = RecordingStatusSink::new();
    let config = RecoveryConfig::default();
    let store = store_with(vec![
        with_error(failed_task("t-1", 0), "connection reset by peer", None),
        with_error(failed_task("t-2", 0), "boom", Some("ImportError")),
        TaskRecord::new("t-3", "ws-test", "fine").with_status(TaskStatus::Pending),
    ]);
    let orchestrator = RecoveryOrchestrator::new(config.clone(), store.clone());
    let executor = RecoveryExecutor::new(&config, store.clone())
        .with_notifier(notifier.clone())
        .with_status_sink(statuses.clone());

    let report = executor.recover_workspace(&orchestrator, &workspace()).await.unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.recovered, 1);
    assert_eq!(report.escalated, 1);
    assert_eq!(report.status, WorkspaceStatus::Degraded);
    assert_eq!(statuses.last(), Some(WorkspaceStatus::Degraded));
    assert_eq!(statuses.statuses(), vec![(workspace(), WorkspaceStatus::Degraded)]);
    assert!(
        wait_until(Duration::from_secs(1), || {
            notifier.notifications().iter().any(|n| {
                matches!(
                    n,
                    Notification::WorkspaceStatusChanged {
                        status: WorkspaceStatus::Degraded,
                        ..
                    }
                )
            })
        })
        .await
    );
    assert_eq!(
        store.snapshot(&"t-3".into()).unwrap().status,
        TaskStatus::Pending
    );
}

/// Tenet: full recovery leaves the workspace active; none leaves it recovering.
#[tokio::test]
async fn workspace_status_follows_recovery_share() {
    let config = RecoveryConfig::default();

    let all_ok = store_with(vec![
        with_error(failed_task("t-1", 0), "HTTP 429", None),
        with_error(failed_task("t-2", 0), "connection refused", None),
    ]);
    let executor = RecoveryExecutor::new(&config, all_ok.clone());
    let orchestrator = RecoveryOrchestrator::new(config.clone(), all_ok);
    let report = executor.recover_workspace(&orchestrator, &workspace()).await.unwrap();
    assert_eq!(report.status, WorkspaceStatus::Active);

    let none_ok = store_with(vec![
        with_error(failed_task("t-1", 0), "x", Some("ImportError")),
        with_error(failed_task("t-2", 0), "no module named pandas", None),
    ]);
    let executor = RecoveryExecutor::new(&config, none_ok.clone());
    let orchestrator = RecoveryOrchestrator::new(config, none_ok);
    let report = executor.recover_workspace(&orchestrator, &workspace()).await.unwrap();
    assert_eq!(report.status, WorkspaceStatus::AutoRecovering);
    assert_eq!(report.recovered, 0);
}

/// Tenet: a low-confidence analysis is escalated rather than executed.
#[tokio::test]
async fn low_confidence_analysis_escalates() {
    let h = Harness::new(RecoveryConfig::default(), vec![failed_task("t-1", 0)]);
    let mut analysis = h
        .orchestrator
        .analyze_task_recovery(&"t-1".into(), &workspace(), "KeyError", None, None)
        .await;
    analysis.strategy = RecoveryStrategy::SkipWithFallback;
    analysis.decision = RecoveryDecision::Skip;
    analysis.confidence_score = 0.1;

    let outcome = h.executor.execute(&"t-1".into(), &analysis).await.unwrap();
    assert_eq!(outcome, RecoveryOutcome::Escalated);
}
