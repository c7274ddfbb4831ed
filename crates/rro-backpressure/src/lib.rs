//! RRO Backpressure
//!
//! System-level circuit breaker for corrective work. Before callers create new
//! validation or corrective tasks for a goal they ask
//! `BackpressureGovernor::should_validate`, which looks at grace periods and
//! workspace velocity so a goal that is progressing normally does not keep
//! attracting new work.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod governor;
pub mod velocity;

pub use governor::{BackpressureDecision, BackpressureGovernor};
pub use velocity::{CacheStats, VelocityCache, VelocityClass, VelocityProfile, VelocityTrend};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
