//! Core types for RRO
//!
//! Defines the records the recovery core reads and produces:
//! - Identifiers for tasks, workspaces, goals, agents
//! - Task and goal records as held by the task store
//! - The per-call recovery context
//! - The audited analysis result

use crate::state::TaskStatus;
use crate::strategy::{RecoveryDecision, RecoveryStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new ULID-backed id
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new().to_string())
            }

            /// Borrow the raw id
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Task identifier, as assigned by the task store
    TaskId
);
string_id!(
    /// Workspace identifier
    WorkspaceId
);
string_id!(
    /// Goal identifier
    GoalId
);
string_id!(
    /// Agent identifier
    AgentId
);

/// A task as held by the task store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task id
    pub id: TaskId,
    /// Owning workspace
    pub workspace_id: WorkspaceId,
    /// Goal this task serves
    pub goal_id: Option<GoalId>,
    /// Parent task when produced by decomposition
    pub parent_id: Option<TaskId>,
    /// Short name
    pub name: String,
    /// Longer description
    pub description: Option<String>,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Assigned agent
    pub agent_id: Option<AgentId>,
    /// Credit given on completion, 0-100
    pub completion_percentage: Option<u8>,
    /// Result payload
    pub result: Option<Value>,
    /// Free-form annotations (recovery hints, excluded agents)
    pub metadata: Map<String, Value>,
    /// Earliest time the next attempt may start
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a pending task
    #[must_use]
    pub fn new(
        id: impl Into<TaskId>,
        workspace_id: impl Into<WorkspaceId>,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            goal_id: None,
            parent_id: None,
            name: name.into(),
            description: None,
            status: TaskStatus::Pending,
            retry_count: 0,
            agent_id: None,
            completion_percentage: None,
            result: None,
            metadata: Map::new(),
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// With goal
    #[inline]
    #[must_use]
    pub fn with_goal(mut self, goal_id: impl Into<GoalId>) -> Self {
        self.goal_id = Some(goal_id.into());
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// With retry count
    #[inline]
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// With assigned agent
    #[inline]
    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// With creation time (also resets `updated_at`)
    #[inline]
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    /// Mark completed at `at` with full credit
    #[inline]
    #[must_use]
    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.status = TaskStatus::Completed;
        self.completion_percentage = Some(100);
        self.completed_at = Some(at);
        self.updated_at = at;
        self
    }
}

/// A goal as held by the task store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRecord {
    /// Goal id
    pub id: GoalId,
    /// Owning workspace
    pub workspace_id: WorkspaceId,
    /// What the goal is for
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl GoalRecord {
    /// Create a goal created now
    #[must_use]
    pub fn new(
        id: impl Into<GoalId>,
        workspace_id: impl Into<WorkspaceId>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// With creation time
    #[inline]
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }
}

/// Everything known about one failure, rebuilt per analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryContext {
    /// Failed task
    pub task_id: TaskId,
    /// Owning workspace
    pub workspace_id: WorkspaceId,
    /// Agent that ran the failed attempt
    pub agent_id: Option<AgentId>,
    /// Raw error text
    pub error_message: String,
    /// Error class name, e.g. `ImportError`
    pub error_type: Option<String>,
    /// Task name
    pub task_name: Option<String>,
    /// Task description
    pub task_description: Option<String>,
    /// Failed attempts before this one
    pub previous_attempts: u32,
    /// When the context was built
    pub created_at: DateTime<Utc>,
}

impl RecoveryContext {
    /// Create context with no prior attempts
    #[must_use]
    pub fn new(
        task_id: impl Into<TaskId>,
        workspace_id: impl Into<WorkspaceId>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            workspace_id: workspace_id.into(),
            agent_id: None,
            error_message: error_message.into(),
            error_type: None,
            task_name: None,
            task_description: None,
            previous_attempts: 0,
            created_at: Utc::now(),
        }
    }

    /// With error type
    #[inline]
    #[must_use]
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// With task name
    #[inline]
    #[must_use]
    pub fn with_task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = Some(name.into());
        self
    }

    /// With previous attempts
    #[inline]
    #[must_use]
    pub fn with_previous_attempts(mut self, attempts: u32) -> Self {
        self.previous_attempts = attempts;
        self
    }

    /// With agent
    #[inline]
    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Fill agent, name, description and attempt count from the stored task
    #[must_use]
    pub fn with_task(mut self, task: &TaskRecord) -> Self {
        self.agent_id.clone_from(&task.agent_id);
        self.previous_attempts = task.retry_count;
        if self.task_name.is_none() {
            self.task_name = Some(task.name.clone());
        }
        self.task_description.clone_from(&task.description);
        self
    }

    /// Case-insensitive match on the error type
    #[must_use]
    pub fn error_type_is(&self, name: &str) -> bool {
        self.error_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(name))
    }
}

/// Outcome of one recovery analysis, persisted for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAnalysisResult {
    /// Analysis id
    pub analysis_id: String,
    /// Analysed task
    pub task_id: TaskId,
    /// Owning workspace
    pub workspace_id: WorkspaceId,
    /// Final decision after gates
    pub decision: RecoveryDecision,
    /// Recommended strategy
    pub strategy: RecoveryStrategy,
    /// Confidence in [0, 1]
    pub confidence_score: f64,
    /// Delay before the next attempt
    pub recommended_delay_seconds: u64,
    /// Retry budget applied
    pub max_retries: u32,
    /// Attempts already made when analysed
    pub previous_attempts: u32,
    /// Classifier pattern that matched, if any
    pub pattern_id: Option<String>,
    /// Human-readable reasoning
    pub reasoning: String,
    /// Whether the advisor's recommendation was used
    pub ai_used: bool,
    /// Wall time of the analysis
    pub analysis_duration_ms: f64,
    /// When the analysis finished
    pub timestamp: DateTime<Utc>,
}

/// Workspace health after a recovery batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    /// Every failure recovered
    Active,
    /// Some failures recovered
    Degraded,
    /// Nothing recovered yet, automatic recovery continues
    AutoRecovering,
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::AutoRecovering => "auto_recovering",
        };
        f.write_str(s)
    }
}
