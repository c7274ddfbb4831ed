//! RRO Core - Resilience & Recovery Orchestration
//!
//! Shared vocabulary of the recovery core:
//! - Recovery strategies, decisions, and their budgets
//! - Task and goal records plus the task state machine
//! - The per-failure recovery context and the audited analysis result
//! - Configuration for every component
//! - Seams to external collaborators: task store, AI advisor, sinks
//!
//! # Example
//!
//! ```rust
//! use rro_core::{RecoveryContext, RecoveryStrategy, RecoveryDecision};
//!
//! let ctx = RecoveryContext::new("task-1", "ws-1", "connection reset by peer")
//!     .with_previous_attempts(1);
//! assert_eq!(ctx.previous_attempts, 1);
//! assert_eq!(
//!     RecoveryStrategy::SkipWithFallback.default_decision(),
//!     RecoveryDecision::Skip
//! );
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

// Core modules
pub mod advisor;
pub mod config;
pub mod error;
pub mod sinks;
pub mod state;
pub mod store;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use advisor::{AdvisorRequest, RecoveryAdvisor};
pub use config::{
    AdvisorConfig, BackoffConfig, BackpressureConfig, ExecutorConfig, HeuristicConfig,
    HistoryConfig, RecoveryConfig, VelocityCutoffs,
};
pub use error::{AdvisorError, ConfigError, ExecutorError, SinkError, StoreError, TransitionError};
pub use sinks::{
    AnalysisSink, LoggingAnalysisSink, LoggingNotifier, LoggingStatusSink, Notification,
    NotificationSink, WorkspaceStatusSink,
};
pub use state::{allowed_transitions, validate_transition, TaskStatus};
pub use store::{InMemoryTaskStore, TaskStore};
pub use strategy::{BackoffFamily, RecoveryDecision, RecoveryStrategy, UnknownStrategy};
pub use types::{
    AgentId, GoalId, GoalRecord, RecoveryAnalysisResult, RecoveryContext, TaskId, TaskRecord,
    WorkspaceId, WorkspaceStatus,
};

#[cfg(feature = "mocks")]
pub use advisor::MockRecoveryAdvisor;
#[cfg(feature = "mocks")]
pub use store::MockTaskStore;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with RRO
    pub use crate::{
        RecoveryAnalysisResult, RecoveryConfig, RecoveryContext, RecoveryDecision,
        RecoveryStrategy, TaskId, TaskRecord, TaskStatus, TaskStore, WorkspaceId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
