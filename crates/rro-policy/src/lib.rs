//! RRO Policy
//!
//! Decides *which* strategy fits a failure:
//! - `FailureClassifier`: ordered catalog of known failure patterns, first match wins
//! - `PolicyEngine`: optional advisor, validated against the strategy set,
//!   backed by a deterministic `HeuristicTable`
//! - `BackoffCalculator`: pure delay schedule per strategy
//!
//! # Example
//!
//! ```rust
//! use rro_core::{RecoveryContext, RecoveryStrategy};
//! use rro_policy::{backoff, FailureClassifier};
//!
//! let classifier = FailureClassifier::new();
//! let ctx = RecoveryContext::new("t-1", "ws-1", "HTTP 429 Too Many Requests");
//! let pattern = classifier.classify(&ctx.error_message, &ctx).unwrap();
//!
//! assert_eq!(pattern.default_strategy, RecoveryStrategy::LinearBackoff);
//! assert_eq!(backoff::delay(pattern.default_strategy, 2), 10);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod backoff;
pub mod classifier;
pub mod engine;
pub mod heuristics;
pub mod http_advisor;

pub use backoff::BackoffCalculator;
pub use classifier::{FailureClassifier, FailurePattern, PatternMatcher};
pub use engine::{
    parse_advisor_reply, AdvisorRecommendation, PolicyEngine, PolicyRecommendation,
    RecommendationSource,
};
pub use heuristics::{HeuristicRule, HeuristicTable};
pub use http_advisor::HttpAdvisor;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
