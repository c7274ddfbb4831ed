//! Error types for RRO
//!
//! The decision path itself is infallible. These errors exist at the seams:
//! - Task store reads and writes
//! - Advisor calls
//! - Configuration loading
//! - Task state transitions applied by the executor

use crate::state::TaskStatus;
use crate::types::TaskId;

/// Task store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with this id
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A record with this id already exists
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    /// Backend unreachable or timed out
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Record could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if the same call may succeed later
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Advisor errors. Every variant sends the policy engine to its heuristic table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdvisorError {
    /// No advisor configured or it is disabled
    #[error("advisor not configured")]
    NotConfigured,

    /// Call exceeded its own timeout
    #[error("advisor timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured bound
        timeout_ms: u64,
    },

    /// Transport or quota failure
    #[error("advisor request failed: {0}")]
    Request(String),

    /// Reply was not the expected JSON shape
    #[error("malformed advisor response: {0}")]
    Malformed(String),

    /// Reply named a strategy outside the known set
    #[error("advisor proposed unknown strategy: {0}")]
    InvalidStrategy(String),

    /// Confidence missing, NaN, or outside [0, 1]
    #[error("advisor confidence out of range: {0}")]
    InvalidConfidence(f64),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that was read
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML could not be produced
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// A value is outside its legal range
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Illegal task state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// `from -> to` is not an edge of the state machine
    #[error("illegal task transition: {from} -> {to}")]
    Illegal {
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },
}

/// Errors from applying a recovery strategy to a task record
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Task record missing
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Task is not in a state the strategy can act on
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Store read or write failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ExecutorError {
    /// Check if the caller may run the same recovery again
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::TaskNotFound(_) | Self::Transition(_) => false,
        }
    }
}

/// Sink errors. Logged, never surfaced to the decision path.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Sink rejected or failed to deliver the event
    #[error("sink delivery failed: {0}")]
    Delivery(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::NotFound(TaskId::from("t-1"));
        assert!(err.to_string().contains("t-1"));
    }

    #[test]
    fn only_unavailable_store_errors_are_transient() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::NotFound(TaskId::from("t-1")).is_transient());
    }

    #[test]
    fn executor_error_is_retryable() {
        let transient = ExecutorError::Store(StoreError::Unavailable("down".into()));
        assert!(transient.is_retryable());

        let illegal = ExecutorError::Transition(TransitionError::Illegal {
            from: TaskStatus::Completed,
            to: TaskStatus::Pending,
        });
        assert!(!illegal.is_retryable());
        assert!(illegal.to_string().contains("completed -> pending"));
    }

    #[test]
    fn advisor_error_display() {
        let err = AdvisorError::Timeout { timeout_ms: 3000 };
        assert_eq!(err.to_string(), "advisor timed out after 3000ms");
    }
}
