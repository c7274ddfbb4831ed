//! Workspace velocity profiles
//!
//! A profile summarises how fast a workspace is finishing work:
//!
//! ```text
//! score = 0.4 * throughput + 0.4 * completion_ratio + 0.2 * freshness
//!
//! throughput       = min(recent_completions / productive_completions, 1)
//! completion_ratio = completed / total
//! freshness        = 1 - min(average_active_age / stale_task_age, 1)
//! ```
//!
//! A workspace with no completion inside the window is Stalled whatever its
//! score. Profiles gate new corrective work only; they never decide a single
//! task's recovery.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use rro_core::{BackpressureConfig, TaskRecord, TaskStatus, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Velocity class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityClass {
    /// Finishing work quickly
    Excellent,
    /// Finishing work steadily
    Good,
    /// Some progress
    Moderate,
    /// Little progress
    Slow,
    /// No completion in the window
    Stalled,
}

impl VelocityClass {
    /// Canonical snake_case name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Moderate => "moderate",
            Self::Slow => "slow",
            Self::Stalled => "stalled",
        }
    }
}

impl std::fmt::Display for VelocityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completions in the current window against the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityTrend {
    /// At least 20% more completions
    Accelerating,
    /// Within 20%
    Steady,
    /// At least 20% fewer completions
    Decelerating,
}

/// Cached per-workspace velocity summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityProfile {
    /// Workspace
    pub workspace_id: WorkspaceId,
    /// All tasks
    pub total_tasks: usize,
    /// Pending or in progress
    pub active_tasks: usize,
    /// Completed
    pub completed_tasks: usize,
    /// Completions inside the velocity window
    pub recent_completions: usize,
    /// Completions in the window before that
    pub previous_completions: usize,
    /// Mean age of active tasks in hours
    pub average_active_age_hours: f64,
    /// Score in [0, 1]
    pub velocity_score: f64,
    /// Class from the score
    pub class: VelocityClass,
    /// Trend from the two windows
    pub trend: VelocityTrend,
    /// When computed
    pub computed_at: DateTime<Utc>,
}

impl VelocityProfile {
    /// Compute a profile from a workspace's tasks
    #[must_use]
    pub fn compute(
        workspace_id: WorkspaceId,
        tasks: &[TaskRecord],
        config: &BackpressureConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let window = config.velocity_window();
        let window_start = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let previous_start = window_start
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut active = 0usize;
        let mut completed = 0usize;
        let mut recent = 0usize;
        let mut previous = 0usize;
        let mut active_age_hours = 0.0;

        for task in tasks {
            if task.status.is_active() {
                active += 1;
                active_age_hours += hours_between(task.created_at, now);
            }
            if task.status == TaskStatus::Completed {
                completed += 1;
                if let Some(at) = task.completed_at {
                    if at >= window_start {
                        recent += 1;
                    } else if at >= previous_start {
                        previous += 1;
                    }
                }
            }
        }

        let average_active_age_hours = if active == 0 {
            0.0
        } else {
            active_age_hours / count(active)
        };
        let velocity_score = score(
            tasks.len(),
            completed,
            recent,
            average_active_age_hours,
            config,
        );

        Self {
            workspace_id,
            total_tasks: tasks.len(),
            active_tasks: active,
            completed_tasks: completed,
            recent_completions: recent,
            previous_completions: previous,
            average_active_age_hours,
            velocity_score,
            class: classify(velocity_score, recent, config),
            trend: trend(recent, previous),
            computed_at: now,
        }
    }
}

fn score(
    total: usize,
    completed: usize,
    recent: usize,
    average_active_age_hours: f64,
    config: &BackpressureConfig,
) -> f64 {
    let throughput = ratio(recent, config.productive_completions.max(1)).min(1.0);
    let completion_ratio = if total == 0 { 0.0 } else { ratio(completed, total) };
    let freshness = if config.stale_task_age_hours > 0.0 {
        1.0 - (average_active_age_hours / config.stale_task_age_hours).min(1.0)
    } else {
        1.0
    };
    (0.4 * throughput + 0.4 * completion_ratio + 0.2 * freshness).clamp(0.0, 1.0)
}

fn classify(score: f64, recent: usize, config: &BackpressureConfig) -> VelocityClass {
    let cutoffs = &config.velocity_cutoffs;
    if recent == 0 {
        VelocityClass::Stalled
    } else if score >= cutoffs.excellent {
        VelocityClass::Excellent
    } else if score >= cutoffs.good {
        VelocityClass::Good
    } else if score >= cutoffs.moderate {
        VelocityClass::Moderate
    } else {
        VelocityClass::Slow
    }
}

fn trend(recent: usize, previous: usize) -> VelocityTrend {
    let (r, p) = (count(recent), count(previous));
    if previous == 0 {
        if recent > 0 {
            VelocityTrend::Accelerating
        } else {
            VelocityTrend::Steady
        }
    } else if r >= p * 1.2 {
        VelocityTrend::Accelerating
    } else if r <= p * 0.8 {
        VelocityTrend::Decelerating
    } else {
        VelocityTrend::Steady
    }
}

#[allow(clippy::cast_precision_loss)]
fn count(n: usize) -> f64 {
    n as f64
}

fn ratio(a: usize, b: usize) -> f64 {
    count(a) / count(b)
}

#[allow(clippy::cast_precision_loss)]
fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_seconds().max(0) as f64) / 3_600.0
}

/// Statistics for velocity cache monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached profiles
    pub entry_count: u64,
}

/// Per-workspace profile cache with TTL expiry
#[derive(Debug, Clone)]
pub struct VelocityCache {
    inner: Cache<WorkspaceId, Arc<VelocityProfile>>,
}

impl VelocityCache {
    /// Create cache with capacity and TTL
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Cached profile, if still fresh
    pub async fn get(&self, workspace_id: &WorkspaceId) -> Option<Arc<VelocityProfile>> {
        self.inner.get(workspace_id).await
    }

    /// Store a profile
    pub async fn insert(&self, profile: Arc<VelocityProfile>) {
        self.inner
            .insert(profile.workspace_id.clone(), profile)
            .await;
    }

    /// Drop a workspace's profile
    pub async fn invalidate(&self, workspace_id: &WorkspaceId) {
        self.inner.invalidate(workspace_id).await;
    }

    /// Current statistics
    pub async fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks().await;
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn task(id: &str, status: TaskStatus, age_hours: i64) -> TaskRecord {
        TaskRecord::new(id, "ws-1", id)
            .with_status(status)
            .created_at(Utc::now() - ChronoDuration::hours(age_hours))
    }

    fn done(id: &str, hours_ago: i64) -> TaskRecord {
        task(id, TaskStatus::InProgress, hours_ago + 1)
            .completed_at(Utc::now() - ChronoDuration::hours(hours_ago))
    }

    fn profile(tasks: &[TaskRecord]) -> VelocityProfile {
        VelocityProfile::compute("ws-1".into(), tasks, &BackpressureConfig::default(), Utc::now())
    }

    #[test]
    fn empty_workspace_is_stalled() {
        let p = profile(&[]);
        assert_eq!(p.class, VelocityClass::Stalled);
        assert_eq!(p.trend, VelocityTrend::Steady);
    }

    #[test]
    fn many_recent_completions_are_excellent() {
        let tasks: Vec<_> = (0..12).map(|i| done(&format!("t-{i}"), 2)).collect();
        let p = profile(&tasks);
        assert_eq!(p.recent_completions, 12);
        assert_eq!(p.class, VelocityClass::Excellent);
        assert_eq!(p.trend, VelocityTrend::Accelerating);
    }

    #[test]
    fn old_active_tasks_without_completions_stall() {
        let tasks: Vec<_> = (0..4)
            .map(|i| task(&format!("t-{i}"), TaskStatus::InProgress, 72))
            .collect();
        let p = profile(&tasks);
        assert_eq!(p.active_tasks, 4);
        assert!(p.average_active_age_hours >= 72.0);
        assert_eq!(p.class, VelocityClass::Stalled);
    }

    #[test]
    fn fewer_completions_than_before_decelerate() {
        let mut tasks: Vec<_> = (0..10).map(|i| done(&format!("old-{i}"), 30)).collect();
        tasks.push(done("new-0", 1));
        let p = profile(&tasks);
        assert_eq!(p.previous_completions, 10);
        assert_eq!(p.recent_completions, 1);
        assert_eq!(p.trend, VelocityTrend::Decelerating);
    }

    #[test]
    fn score_stays_in_unit_range() {
        let tasks = vec![done("a", 1), task("b", TaskStatus::Pending, 1_000)];
        let p = profile(&tasks);
        assert!((0.0..=1.0).contains(&p.velocity_score));
    }

    #[tokio::test]
    async fn cache_round_trip_and_invalidation() {
        let cache = VelocityCache::with_ttl(100, Duration::from_secs(300));
        let ws = WorkspaceId::from("ws-1");
        cache.insert(Arc::new(profile(&[]))).await;
        assert!(cache.get(&ws).await.is_some());
        assert_eq!(cache.stats().await.entry_count, 1);

        cache.invalidate(&ws).await;
        assert!(cache.get(&ws).await.is_none());
    }
}
