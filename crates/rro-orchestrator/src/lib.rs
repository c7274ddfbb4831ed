//! RRO Orchestrator
//!
//! Per-task recovery on the failure hot path:
//! - `RecoveryOrchestrator`: analysis facade with attempt and confidence gates
//! - `RecoveryHistory`: bounded, time-windowed ring of recent analyses
//! - `RecoveryStats`: aggregates over the history window
//! - `RecoveryExecutor`: applies decisions to task records, including the final fallback
//!
//! # Example
//!
//! ```rust,no_run
//! use rro_core::{InMemoryTaskStore, RecoveryConfig, RecoveryDecision};
//! use rro_orchestrator::RecoveryOrchestrator;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let orchestrator =
//!     RecoveryOrchestrator::new(RecoveryConfig::default(), Arc::new(InMemoryTaskStore::new()));
//! let result = orchestrator
//!     .analyze_task_recovery(&"t-1".into(), &"ws-1".into(), "ImportError: no module named x", None, None)
//!     .await;
//! assert_eq!(result.decision, RecoveryDecision::Escalate);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod executor;
pub mod history;
pub mod orchestrator;
pub mod stats;

pub use executor::{
    RecoveryExecutor, RecoveryOutcome, WorkspaceRecoveryReport, DECOMPOSITION_PART_KEY,
    EXCLUDED_AGENTS_KEY, LAST_ERROR_KEY, LAST_ERROR_TYPE_KEY,
};
pub use history::RecoveryHistory;
pub use orchestrator::RecoveryOrchestrator;
pub use stats::RecoveryStats;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
