//! Testing utilities for RRO workspace
//!
//! Shared fixtures, recording sinks, and scripted collaborators.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rro_core::{
    AdvisorError, AdvisorRequest, AnalysisSink, GoalId, GoalRecord, InMemoryTaskStore,
    Notification, NotificationSink, RecoveryAdvisor, RecoveryAnalysisResult, SinkError,
    StoreError, TaskId, TaskRecord, TaskStatus, TaskStore, WorkspaceId, WorkspaceStatus,
    WorkspaceStatusSink,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

pub const WORKSPACE: &str = "ws-test";
pub const GOAL: &str = "goal-test";

pub fn failed_task(id: &str, retry_count: u32) -> TaskRecord {
    TaskRecord::new(id, WORKSPACE, format!("task {id}"))
        .with_goal(GOAL)
        .with_status(TaskStatus::Failed)
        .with_retry_count(retry_count)
        .with_agent("agent-1")
}

pub fn task_aged(id: &str, status: TaskStatus, age_hours: i64) -> TaskRecord {
    TaskRecord::new(id, WORKSPACE, format!("task {id}"))
        .with_goal(GOAL)
        .with_status(status)
        .created_at(Utc::now() - Duration::hours(age_hours))
}

pub fn completed_task(id: &str, completed_hours_ago: i64) -> TaskRecord {
    let at = Utc::now() - Duration::hours(completed_hours_ago);
    task_aged(id, TaskStatus::InProgress, completed_hours_ago + 1).completed_at(at)
}

pub fn goal_aged(age_minutes: i64) -> GoalRecord {
    GoalRecord::new(GOAL, WORKSPACE, "ship the quarterly report")
        .created_at(Utc::now() - Duration::minutes(age_minutes))
}

pub fn store_with(tasks: impl IntoIterator<Item = TaskRecord>) -> Arc<InMemoryTaskStore> {
    Arc::new(InMemoryTaskStore::with_tasks(tasks))
}

pub fn workspace() -> WorkspaceId {
    WorkspaceId::from(WORKSPACE)
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until(timeout: StdDuration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
}

#[derive(Debug, Default)]
pub struct RecordingAnalysisSink {
    records: Mutex<Vec<RecoveryAnalysisResult>>,
}

impl RecordingAnalysisSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<RecoveryAnalysisResult> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AnalysisSink for RecordingAnalysisSink {
    async fn record(&self, result: &RecoveryAnalysisResult) -> Result<(), SinkError> {
        self.records.lock().push(result.clone());
        Ok(())
    }
}

/// Sink that always fails, for persistence-failure paths
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingAnalysisSink;

#[async_trait]
impl AnalysisSink for FailingAnalysisSink {
    async fn record(&self, _result: &RecoveryAnalysisResult) -> Result<(), SinkError> {
        Err(SinkError::Delivery("audit store offline".to_string()))
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn escalations(&self) -> usize {
        self.notifications
            .lock()
            .iter()
            .filter(|n| matches!(n, Notification::Escalation { .. }))
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        self.notifications.lock().push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    statuses: Mutex<Vec<(WorkspaceId, WorkspaceStatus)>>,
}

impl RecordingStatusSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<(WorkspaceId, WorkspaceStatus)> {
        self.statuses.lock().clone()
    }

    pub fn last(&self) -> Option<WorkspaceStatus> {
        self.statuses.lock().last().map(|(_, s)| *s)
    }
}

#[async_trait]
impl WorkspaceStatusSink for RecordingStatusSink {
    async fn set_status(
        &self,
        workspace_id: &WorkspaceId,
        status: WorkspaceStatus,
    ) -> Result<(), SinkError> {
        self.statuses.lock().push((workspace_id.clone(), status));
        Ok(())
    }
}

/// Advisor behaviour
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Fail(AdvisorError),
    Delay(StdDuration, String),
    Panic,
}

/// Advisor that follows a fixed script and counts calls
#[derive(Debug)]
pub struct ScriptedAdvisor {
    script: Script,
    calls: AtomicU32,
}

impl ScriptedAdvisor {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicU32::new(0),
        })
    }

    pub fn replying(reply: &str) -> Arc<Self> {
        Self::new(Script::Reply(reply.to_string()))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecoveryAdvisor for ScriptedAdvisor {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn recommend(&self, _request: AdvisorRequest) -> Result<String, AdvisorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Reply(reply) => Ok(reply.clone()),
            Script::Fail(err) => Err(err.clone()),
            Script::Delay(delay, reply) => {
                tokio::time::sleep(*delay).await;
                Ok(reply.clone())
            }
            Script::Panic => panic!("scripted advisor fault"),
        }
    }
}

/// Store wrapper that fails the first `failing_reads` reads and `failing_writes` updates
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<InMemoryTaskStore>,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryTaskStore>, failing_reads: u32, failing_writes: u32) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_reads: AtomicU32::new(failing_reads),
            failing_writes: AtomicU32::new(failing_writes),
        })
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn get_task(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        if Self::take(&self.failing_reads) {
            return Err(StoreError::Unavailable("read refused".to_string()));
        }
        self.inner.get_task(task_id).await
    }

    async fn create_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        self.inner.create_task(task).await
    }

    async fn update_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        if Self::take(&self.failing_writes) {
            return Err(StoreError::Unavailable("write refused".to_string()));
        }
        self.inner.update_task(task).await
    }

    async fn list_workspace_tasks(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list_workspace_tasks(workspace_id).await
    }

    async fn list_goal_tasks(&self, goal_id: &GoalId) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list_goal_tasks(goal_id).await
    }
}
