//! Fire-and-forget output seams
//!
//! - `AnalysisSink`: audit trail of analysis results
//! - `NotificationSink`: escalations and workspace degradation
//! - `WorkspaceStatusSink`: workspace status after a recovery batch
//!
//! Failures here are logged by callers and never change a decision.
//! The `Logging*` implementations are the defaults when nothing external is wired.

use crate::error::SinkError;
use crate::types::{RecoveryAnalysisResult, TaskId, WorkspaceId, WorkspaceStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Event pushed to the notification sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A task needs a human
    Escalation {
        /// Escalated task
        task_id: TaskId,
        /// Owning workspace
        workspace_id: WorkspaceId,
        /// Why
        reasoning: String,
    },
    /// A workspace moved to degraded or auto-recovering
    WorkspaceStatusChanged {
        /// Workspace
        workspace_id: WorkspaceId,
        /// New status
        status: WorkspaceStatus,
        /// Failures recovered in the batch
        recovered: usize,
        /// Failures in the batch
        total: usize,
    },
}

/// Audit trail for analysis results
#[async_trait]
pub trait AnalysisSink: Send + Sync {
    /// Persist one result
    async fn record(&self, result: &RecoveryAnalysisResult) -> Result<(), SinkError>;
}

/// Escalation and degradation notices
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Emit one notification
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError>;
}

/// Workspace status writes
#[async_trait]
pub trait WorkspaceStatusSink: Send + Sync {
    /// Write the status of a workspace
    async fn set_status(
        &self,
        workspace_id: &WorkspaceId,
        status: WorkspaceStatus,
    ) -> Result<(), SinkError>;
}

/// Audit sink that writes results to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAnalysisSink;

#[async_trait]
impl AnalysisSink for LoggingAnalysisSink {
    async fn record(&self, result: &RecoveryAnalysisResult) -> Result<(), SinkError> {
        tracing::debug!(
            analysis_id = %result.analysis_id,
            task_id = %result.task_id,
            decision = %result.decision,
            strategy = %result.strategy,
            confidence = result.confidence_score,
            "recovery analysis recorded"
        );
        Ok(())
    }
}

/// Notification sink that writes notices to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationSink for LoggingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        match notification {
            Notification::Escalation {
                task_id,
                workspace_id,
                reasoning,
            } => tracing::warn!(%task_id, %workspace_id, %reasoning, "task escalated"),
            Notification::WorkspaceStatusChanged {
                workspace_id,
                status,
                recovered,
                total,
            } => tracing::warn!(%workspace_id, %status, recovered, total, "workspace status changed"),
        }
        Ok(())
    }
}

/// Status sink that writes statuses to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStatusSink;

#[async_trait]
impl WorkspaceStatusSink for LoggingStatusSink {
    async fn set_status(
        &self,
        workspace_id: &WorkspaceId,
        status: WorkspaceStatus,
    ) -> Result<(), SinkError> {
        tracing::info!(%workspace_id, %status, "workspace status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_is_tagged() {
        let notification = Notification::WorkspaceStatusChanged {
            workspace_id: WorkspaceId::from("ws-1"),
            status: WorkspaceStatus::Degraded,
            recovered: 1,
            total: 3,
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["kind"], "workspace_status_changed");
        assert_eq!(json["status"], "degraded");
    }

    #[tokio::test]
    async fn logging_sinks_never_fail() {
        let notice = Notification::Escalation {
            task_id: TaskId::from("t-1"),
            workspace_id: WorkspaceId::from("ws-1"),
            reasoning: "import failure".into(),
        };
        assert!(LoggingNotifier.notify(&notice).await.is_ok());
        assert!(LoggingStatusSink
            .set_status(&WorkspaceId::from("ws-1"), WorkspaceStatus::Active)
            .await
            .is_ok());
    }
}
