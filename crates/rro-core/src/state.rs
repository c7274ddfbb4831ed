//! Task lifecycle state machine
//!
//! ```text
//! Pending ──► InProgress ──► Completed
//!    │            │
//!    └──► Failed ◄┘
//!           │
//!           ├──► Pending     (retry, new agent, reconstructed context)
//!           ├──► Completed   (fallback, final fallback, decomposed)
//!           └──► Escalated
//! ```

use crate::error::TransitionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a task record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for an agent
    Pending,
    /// Being worked on
    InProgress,
    /// Last attempt failed
    Failed,
    /// Done, possibly with partial credit
    Completed,
    /// Handed to a human
    Escalated,
}

impl TaskStatus {
    /// No transition leaves a terminal status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Escalated)
    }

    /// Counts toward the workspace's active load
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

/// Statuses reachable from `from` in one step
pub fn allowed_transitions(from: TaskStatus) -> Vec<TaskStatus> {
    use TaskStatus::*;
    match from {
        Pending => vec![InProgress, Failed],
        InProgress => vec![Completed, Failed],
        Failed => vec![Pending, Completed, Escalated],
        Completed | Escalated => vec![],
    }
}

/// Validates a single status transition
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Illegal { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Pending),
            Just(TaskStatus::InProgress),
            Just(TaskStatus::Failed),
            Just(TaskStatus::Completed),
            Just(TaskStatus::Escalated),
        ]
    }

    #[test]
    fn failed_reaches_every_recovery_target() {
        assert!(validate_transition(TaskStatus::Failed, TaskStatus::Pending).is_ok());
        assert!(validate_transition(TaskStatus::Failed, TaskStatus::Completed).is_ok());
        assert!(validate_transition(TaskStatus::Failed, TaskStatus::Escalated).is_ok());
        assert!(validate_transition(TaskStatus::Failed, TaskStatus::InProgress).is_err());
    }

    #[test]
    fn terminal_states_are_closed() {
        assert!(allowed_transitions(TaskStatus::Completed).is_empty());
        assert!(allowed_transitions(TaskStatus::Escalated).is_empty());
        assert!(TaskStatus::Escalated.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
    }

    proptest! {
        #[test]
        fn prop_validation_agrees_with_allowed(from in any_status(), to in any_status()) {
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }
    }
}
