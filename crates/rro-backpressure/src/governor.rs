//! Adaptive Backpressure Governor
//!
//! Consulted before spawning *new* corrective work for a goal (never for
//! retries). Checks run in order and the first conclusive one wins:
//!
//! 1. Grace period: a young goal, or a goal with a young task, is left alone
//! 2. Velocity: Excellent/Good suppress, Slow/Stalled proceed, Moderate falls through
//! 3. Adaptive threshold: suppress if the goal's completion rate already meets
//!    `base_completion_threshold` adjusted by at most `max_threshold_adjustment`
//!
//! A workspace whose velocity cannot be computed is not gated (fail open).

use crate::velocity::{CacheStats, VelocityCache, VelocityClass, VelocityProfile, VelocityTrend};
use chrono::{DateTime, Utc};
use rro_core::{
    BackpressureConfig, GoalRecord, StoreError, TaskRecord, TaskStatus, TaskStore, WorkspaceId,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const FAIL_OPEN_CONFIDENCE: f64 = 0.3;

/// Outcome of a backpressure check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackpressureDecision {
    /// Whether new corrective work may be created
    pub should_proceed: bool,
    /// Which check decided and why
    pub reason: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Time left in the grace period, when that check decided
    pub grace_remaining: Option<Duration>,
    /// Threshold used, when the adaptive check decided
    pub adaptive_threshold: Option<f64>,
    /// Velocity class, when it was computed
    pub velocity_class: Option<VelocityClass>,
}

impl BackpressureDecision {
    fn new(should_proceed: bool, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            should_proceed,
            reason: reason.into(),
            confidence,
            grace_remaining: None,
            adaptive_threshold: None,
            velocity_class: None,
        }
    }
}

/// Gate on new corrective work per goal
pub struct BackpressureGovernor {
    config: BackpressureConfig,
    store: Arc<dyn TaskStore>,
    cache: VelocityCache,
}

impl std::fmt::Debug for BackpressureGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureGovernor")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl BackpressureGovernor {
    /// Create governor reading tasks from `store`
    #[must_use]
    pub fn new(config: BackpressureConfig, store: Arc<dyn TaskStore>) -> Self {
        let cache = VelocityCache::with_ttl(
            config.velocity_cache_capacity,
            Duration::from_secs(config.velocity_cache_ttl_secs),
        );
        Self {
            config,
            store,
            cache,
        }
    }

    /// Decide whether new corrective work may be created for a goal.
    ///
    /// `recent_tasks` are the goal's tasks if the caller already has them;
    /// otherwise they are read from the store.
    #[tracing::instrument(skip(self, goal, recent_tasks), fields(goal_id = %goal.id))]
    pub async fn should_validate(
        &self,
        workspace_id: &WorkspaceId,
        goal: &GoalRecord,
        recent_tasks: Option<&[TaskRecord]>,
    ) -> BackpressureDecision {
        let now = Utc::now();
        let fetched;
        let tasks: &[TaskRecord] = match recent_tasks {
            Some(tasks) => tasks,
            None => {
                fetched = match self.store.list_goal_tasks(&goal.id).await {
                    Ok(tasks) => tasks,
                    Err(err) => {
                        tracing::warn!(error = %err, "goal tasks unavailable, grace check uses goal only");
                        Vec::new()
                    }
                };
                &fetched
            }
        };

        if let Some(decision) = self.grace_check(goal, tasks, now) {
            tracing::info!(reason = %decision.reason, "corrective work suppressed");
            return decision;
        }

        let profile = match self.velocity(workspace_id).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(%workspace_id, error = %err, "velocity unavailable, proceeding");
                return BackpressureDecision::new(
                    true,
                    FAIL_OPEN_CONFIDENCE,
                    format!("velocity unavailable ({err}); proceeding without backpressure"),
                );
            }
        };

        let decision = match profile.class {
            VelocityClass::Excellent => Some(BackpressureDecision::new(
                false,
                0.9,
                format!(
                    "workspace velocity is excellent (score {:.2}, {} recent completions)",
                    profile.velocity_score, profile.recent_completions
                ),
            )),
            VelocityClass::Good => Some(BackpressureDecision::new(
                false,
                0.75,
                format!("workspace velocity is good (score {:.2})", profile.velocity_score),
            )),
            VelocityClass::Slow => Some(BackpressureDecision::new(
                true,
                0.8,
                format!("workspace velocity is slow (score {:.2})", profile.velocity_score),
            )),
            VelocityClass::Stalled => Some(BackpressureDecision::new(
                true,
                0.9,
                "workspace is stalled: no completions inside the velocity window",
            )),
            VelocityClass::Moderate => None,
        };

        let mut decision =
            decision.unwrap_or_else(|| self.adaptive_check(&profile, tasks));
        decision.velocity_class = Some(profile.class);
        tracing::info!(
            proceed = decision.should_proceed,
            velocity = %profile.class,
            reason = %decision.reason,
            "backpressure decided"
        );
        decision
    }

    /// Current profile for a workspace, from the cache or freshly computed
    pub async fn velocity(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Arc<VelocityProfile>, StoreError> {
        if let Some(profile) = self.cache.get(workspace_id).await {
            tracing::debug!(%workspace_id, "velocity cache hit");
            return Ok(profile);
        }

        let tasks = self.store.list_workspace_tasks(workspace_id).await?;
        let profile = Arc::new(VelocityProfile::compute(
            workspace_id.clone(),
            &tasks,
            &self.config,
            Utc::now(),
        ));
        self.cache.insert(Arc::clone(&profile)).await;
        Ok(profile)
    }

    /// Drop a workspace's cached profile
    pub async fn invalidate_velocity(&self, workspace_id: &WorkspaceId) {
        self.cache.invalidate(workspace_id).await;
    }

    /// Velocity cache statistics
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Threshold the adaptive check would use for a profile
    #[must_use]
    pub fn adaptive_threshold(&self, profile: &VelocityProfile) -> f64 {
        let c = &self.config;
        let throughput = if c.productive_completions == 0 {
            1.0
        } else {
            (to_f64(profile.recent_completions) / to_f64(c.productive_completions)).min(1.0)
        };
        let staleness = if c.stale_task_age_hours > 0.0 {
            (profile.average_active_age_hours / c.stale_task_age_hours).min(1.0)
        } else {
            0.0
        };
        let trend = match profile.trend {
            VelocityTrend::Accelerating => -0.1,
            VelocityTrend::Steady => 0.0,
            VelocityTrend::Decelerating => 0.1,
        };

        // Productive workspaces need less validation, stale ones more
        let adjustment = (-(throughput - 0.5) * 0.2 + (staleness - 0.5) * 0.2 + trend)
            .clamp(-c.max_threshold_adjustment, c.max_threshold_adjustment);
        (c.base_completion_threshold + adjustment).clamp(0.0, 1.0)
    }

    fn grace_check(
        &self,
        goal: &GoalRecord,
        tasks: &[TaskRecord],
        now: DateTime<Utc>,
    ) -> Option<BackpressureDecision> {
        let grace = self.config.grace_period();
        let hours = self.config.grace_period_hours;

        let remaining = |created: DateTime<Utc>| -> Option<chrono::Duration> {
            let age = now - created;
            (age < grace).then(|| grace.checked_sub(&age).unwrap_or(grace))
        };

        if let Some(left) = remaining(goal.created_at) {
            let mut decision = BackpressureDecision::new(
                false,
                0.95,
                format!(
                    "goal created {} minute(s) ago, inside the {hours}h grace period",
                    (now - goal.created_at).num_minutes()
                ),
            );
            decision.grace_remaining = left.to_std().ok();
            return Some(decision);
        }

        let newest = tasks.iter().map(|t| t.created_at).max()?;
        let left = remaining(newest)?;
        let mut decision = BackpressureDecision::new(
            false,
            0.85,
            format!(
                "newest goal task created {} minute(s) ago, inside the {hours}h grace period",
                (now - newest).num_minutes()
            ),
        );
        decision.grace_remaining = left.to_std().ok();
        Some(decision)
    }

    fn adaptive_check(&self, profile: &VelocityProfile, tasks: &[TaskRecord]) -> BackpressureDecision {
        let threshold = self.adaptive_threshold(profile);
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let rate = if tasks.is_empty() {
            0.0
        } else {
            to_f64(completed) / to_f64(tasks.len())
        };

        let mut decision = if rate >= threshold {
            BackpressureDecision::new(
                false,
                0.7,
                format!("goal completion {rate:.2} meets adaptive threshold {threshold:.2}"),
            )
        } else {
            BackpressureDecision::new(
                true,
                0.6,
                format!("goal completion {rate:.2} below adaptive threshold {threshold:.2}"),
            )
        };
        decision.adaptive_threshold = Some(threshold);
        decision
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(n: usize) -> f64 {
    n as f64
}
