//! RRO configuration
//!
//! Every tunable the recovery core uses, grouped by component. All groups
//! deserialize with defaults, so a TOML file only needs the values it changes:
//!
//! ```toml
//! max_attempts = 4
//! confidence_threshold = 0.6
//!
//! [advisor]
//! enabled = true
//! timeout_ms = 1500
//!
//! [backpressure]
//! grace_period_hours = 1
//! ```
//!
//! The heuristic constants (attempt cut-offs, base confidences, the adaptive
//! threshold bound) are empirical. They live here so they can be recalibrated
//! without code changes.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Global cap on failed attempts per task
    pub max_attempts: u32,
    /// Minimum confidence before a decision is acted on automatically
    pub confidence_threshold: f64,
    /// AI advisor
    pub advisor: AdvisorConfig,
    /// Deterministic fallback table
    pub heuristics: HeuristicConfig,
    /// Backoff schedule
    pub backoff: BackoffConfig,
    /// Rolling analysis history
    pub history: HistoryConfig,
    /// Strategy executor
    pub executor: ExecutorConfig,
    /// Backpressure governor
    pub backpressure: BackpressureConfig,
}

impl RecoveryConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With global attempt cap
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// With confidence threshold
    #[inline]
    #[must_use]
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// With advisor enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_advisor_enabled(mut self, enabled: bool) -> Self {
        self.advisor.enabled = enabled;
        self
    }

    /// With heuristic table
    #[inline]
    #[must_use]
    pub fn with_heuristics(mut self, heuristics: HeuristicConfig) -> Self {
        self.heuristics = heuristics;
        self
    }

    /// With backpressure settings
    #[inline]
    #[must_use]
    pub fn with_backpressure(mut self, backpressure: BackpressureConfig) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Parse and validate TOML
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check ranges and orderings
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("confidence_threshold", self.confidence_threshold)?;
        check_unit("advisor.failure_penalty", self.advisor.failure_penalty)?;
        check_unit(
            "advisor.internal_fault_confidence",
            self.advisor.internal_fault_confidence,
        )?;
        if self.advisor.timeout_ms == 0 {
            return Err(ConfigError::invalid("advisor.timeout_ms", "must be positive"));
        }

        let h = &self.heuristics;
        for (field, value) in [
            ("heuristics.timeout_confidence", h.timeout_confidence),
            ("heuristics.context_confidence", h.context_confidence),
            ("heuristics.agent_confidence", h.agent_confidence),
            ("heuristics.alternative_confidence", h.alternative_confidence),
            ("heuristics.decompose_confidence", h.decompose_confidence),
            ("heuristics.skip_confidence", h.skip_confidence),
            ("heuristics.attempt_penalty", h.attempt_penalty),
            ("heuristics.min_confidence", h.min_confidence),
        ] {
            check_unit(field, value)?;
        }
        if h.skip_after_attempts < h.decompose_after_attempts {
            return Err(ConfigError::invalid(
                "heuristics.skip_after_attempts",
                "must not be lower than decompose_after_attempts",
            ));
        }

        let b = &self.backoff;
        if b.exponential_base_secs > b.exponential_max_secs {
            return Err(ConfigError::invalid(
                "backoff.exponential_base_secs",
                "exceeds exponential_max_secs",
            ));
        }
        if b.linear_step_secs > b.linear_max_secs {
            return Err(ConfigError::invalid(
                "backoff.linear_step_secs",
                "exceeds linear_max_secs",
            ));
        }

        if self.history.capacity == 0 {
            return Err(ConfigError::invalid("history.capacity", "must be positive"));
        }
        if self.history.window_secs == 0 {
            return Err(ConfigError::invalid("history.window_secs", "must be positive"));
        }

        let e = &self.executor;
        if e.skip_completion_percentage > 100 || e.final_fallback_completion_percentage > 100 {
            return Err(ConfigError::invalid(
                "executor.completion_percentage",
                "must be at most 100",
            ));
        }
        if e.decomposition_subtasks == 0 {
            return Err(ConfigError::invalid(
                "executor.decomposition_subtasks",
                "must be positive",
            ));
        }
        if e.final_fallback_write_attempts == 0 {
            return Err(ConfigError::invalid(
                "executor.final_fallback_write_attempts",
                "must be positive",
            ));
        }

        let bp = &self.backpressure;
        check_unit("backpressure.base_completion_threshold", bp.base_completion_threshold)?;
        check_unit("backpressure.max_threshold_adjustment", bp.max_threshold_adjustment)?;
        if bp.velocity_window_hours == 0 {
            return Err(ConfigError::invalid(
                "backpressure.velocity_window_hours",
                "must be positive",
            ));
        }
        let cuts = &bp.velocity_cutoffs;
        if !(cuts.excellent >= cuts.good && cuts.good >= cuts.moderate && cuts.moderate >= 0.0) {
            return Err(ConfigError::invalid(
                "backpressure.velocity_cutoffs",
                "must satisfy excellent >= good >= moderate >= 0",
            ));
        }
        Ok(())
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            confidence_threshold: 0.5,
            advisor: AdvisorConfig::default(),
            heuristics: HeuristicConfig::default(),
            backoff: BackoffConfig::default(),
            history: HistoryConfig::default(),
            executor: ExecutorConfig::default(),
            backpressure: BackpressureConfig::default(),
        }
    }
}

fn check_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")))
    }
}

/// AI advisor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Consult the advisor at all
    pub enabled: bool,
    /// Per-call timeout, independent of the caller's budget
    pub timeout_ms: u64,
    /// Confidence subtracted from the fallback when the advisor failed
    pub failure_penalty: f64,
    /// Confidence used when the advisor call itself faulted
    pub internal_fault_confidence: f64,
    /// Chat-completions endpoint for the HTTP advisor
    pub endpoint: String,
    /// Model name sent to the endpoint
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl AdvisorConfig {
    /// Timeout as a `Duration`
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 3_000,
            failure_penalty: 0.1,
            internal_fault_confidence: 0.3,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Deterministic fallback table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Timeout -> exponential backoff
    pub timeout_confidence: f64,
    /// Missing/context -> context reconstruction
    pub context_confidence: f64,
    /// Agent/skill -> different agent
    pub agent_confidence: f64,
    /// Nothing else matched -> alternative approach
    pub alternative_confidence: f64,
    /// Complex task or repeated failure -> decompose
    pub decompose_confidence: f64,
    /// Many failures -> skip with fallback
    pub skip_confidence: f64,
    /// Confidence lost per previous attempt
    pub attempt_penalty: f64,
    /// Lower bound on any heuristic confidence
    pub min_confidence: f64,
    /// Attempts after which an unmatched failure is decomposed
    pub decompose_after_attempts: u32,
    /// Attempts after which an unmatched failure is skipped
    pub skip_after_attempts: u32,
    /// Words marking a task name as complex
    pub complex_name_keywords: Vec<String>,
    /// Word count marking a task name as complex
    pub complex_name_word_threshold: usize,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            timeout_confidence: 0.8,
            context_confidence: 0.75,
            agent_confidence: 0.7,
            alternative_confidence: 0.65,
            decompose_confidence: 0.6,
            skip_confidence: 0.6,
            attempt_penalty: 0.03,
            min_confidence: 0.05,
            decompose_after_attempts: 2,
            skip_after_attempts: 3,
            complex_name_keywords: ["comprehensive", "complete", "entire", "end-to-end", "multiple", "full"]
                .into_iter()
                .map(String::from)
                .collect(),
            complex_name_word_threshold: 8,
        }
    }
}

/// Backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First exponential delay
    pub exponential_base_secs: u64,
    /// Exponential cap
    pub exponential_max_secs: u64,
    /// Linear delay step
    pub linear_step_secs: u64,
    /// Linear cap
    pub linear_max_secs: u64,
    /// Circuit-breaker cool-down
    pub circuit_breaker_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            exponential_base_secs: 5,
            exponential_max_secs: 300,
            linear_step_secs: 5,
            linear_max_secs: 600,
            circuit_breaker_secs: 1_800,
        }
    }
}

/// Rolling history bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum retained analyses
    pub capacity: usize,
    /// Maximum age of a retained analysis
    pub window_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            window_secs: 24 * 60 * 60,
        }
    }
}

/// Strategy executor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Credit for SkipWithFallback
    pub skip_completion_percentage: u8,
    /// Credit for the final fallback
    pub final_fallback_completion_percentage: u8,
    /// Children spawned by DecomposeIntoSubtasks
    pub decomposition_subtasks: usize,
    /// Store write attempts for the final fallback
    pub final_fallback_write_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            skip_completion_percentage: 80,
            final_fallback_completion_percentage: 60,
            decomposition_subtasks: 3,
            final_fallback_write_attempts: 3,
        }
    }
}

/// Backpressure governor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Goals and tasks younger than this are left alone
    pub grace_period_hours: u64,
    /// Window for "recent" completions
    pub velocity_window_hours: u64,
    /// Velocity profile cache TTL
    pub velocity_cache_ttl_secs: u64,
    /// Maximum cached workspaces
    pub velocity_cache_capacity: u64,
    /// Completion rate above which a goal is considered on track
    pub base_completion_threshold: f64,
    /// Bound on the adaptive adjustment, either direction
    pub max_threshold_adjustment: f64,
    /// Average active-task age, in hours, considered stale
    pub stale_task_age_hours: f64,
    /// Recent completions considered a productive workspace
    pub productive_completions: usize,
    /// Velocity score cut-offs
    pub velocity_cutoffs: VelocityCutoffs,
}

impl BackpressureConfig {
    /// Grace period as a chrono duration
    #[inline]
    #[must_use]
    pub fn grace_period(&self) -> chrono::Duration {
        hours(self.grace_period_hours)
    }

    /// Velocity window as a chrono duration
    #[inline]
    #[must_use]
    pub fn velocity_window(&self) -> chrono::Duration {
        hours(self.velocity_window_hours)
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            grace_period_hours: 2,
            velocity_window_hours: 24,
            velocity_cache_ttl_secs: 300,
            velocity_cache_capacity: 10_000,
            base_completion_threshold: 0.7,
            max_threshold_adjustment: 0.3,
            stale_task_age_hours: 48.0,
            productive_completions: 10,
            velocity_cutoffs: VelocityCutoffs::default(),
        }
    }
}

fn hours(h: u64) -> chrono::Duration {
    i64::try_from(h)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or(chrono::Duration::MAX)
}

/// Velocity score cut-offs. Scores below `moderate` with any recent
/// completion are Slow, scores with none are Stalled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityCutoffs {
    /// Excellent at or above
    pub excellent: f64,
    /// Good at or above
    pub good: f64,
    /// Moderate at or above
    pub moderate: f64,
}

impl Default for VelocityCutoffs {
    fn default() -> Self {
        Self {
            excellent: 0.8,
            good: 0.6,
            moderate: 0.35,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        assert!(RecoveryConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RecoveryConfig::from_toml_str(
            r#"
            max_attempts = 4

            [advisor]
            enabled = true

            [backpressure]
            grace_period_hours = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.max_attempts, 4);
        assert!(config.advisor.enabled);
        assert_eq!(config.advisor.timeout_ms, 3_000);
        assert_eq!(config.backpressure.grace_period_hours, 1);
        assert_eq!(config.backoff, BackoffConfig::default());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = RecoveryConfig::from_toml_str("confidence_threshold = 1.5").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "confidence_threshold",
                ..
            }
        ));
    }

    #[test]
    fn inverted_backoff_caps_are_rejected() {
        let config = RecoveryConfig {
            backoff: BackoffConfig {
                linear_step_secs: 700,
                ..BackoffConfig::default()
            },
            ..RecoveryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = RecoveryConfig::default().with_max_attempts(7);
        let rendered = config.to_toml_string().unwrap();
        let parsed = RecoveryConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "confidence_threshold = 0.65").unwrap();

        let config = RecoveryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.confidence_threshold, 0.65);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = RecoveryConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
