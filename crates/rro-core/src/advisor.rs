//! AI advisor seam
//!
//! An advisor receives the serialized recovery context and replies with raw
//! text that should contain `{"strategy": ..., "confidence": ..., "reasoning": ...}`.
//! The reply is untrusted: the policy engine validates it against the strategy
//! set before using it.

use crate::error::AdvisorError;
use crate::strategy::RecoveryStrategy;
use crate::types::RecoveryContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request submitted to an advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorRequest {
    /// Failure being analysed
    pub context: RecoveryContext,
    /// Names the reply must choose from
    pub allowed_strategies: Vec<String>,
    /// Reply instructions
    pub instruction: String,
}

impl AdvisorRequest {
    /// Build a request restricted to the known strategy set
    #[must_use]
    pub fn new(context: RecoveryContext) -> Self {
        let instruction = format!(
            "A task failed. Recommend exactly one recovery strategy from: {}. \
             Reply with a JSON object {{\"strategy\": <name>, \"confidence\": <number in [0,1]>, \
             \"reasoning\": <short text>}} and nothing else.",
            RecoveryStrategy::names()
        );
        Self {
            context,
            allowed_strategies: RecoveryStrategy::ALL
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            instruction,
        }
    }

    /// Context rendered as pretty JSON for prompt embedding
    #[must_use]
    pub fn context_json(&self) -> String {
        serde_json::to_string_pretty(&self.context).unwrap_or_else(|_| self.context.error_message.clone())
    }
}

/// Probabilistic recovery advisor
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait RecoveryAdvisor: Send + Sync {
    /// Short name for logs
    fn name(&self) -> String;

    /// Ask for a recommendation; returns the raw reply text
    async fn recommend(&self, request: AdvisorRequest) -> Result<String, AdvisorError>;
}
