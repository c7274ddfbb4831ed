//! Task store seam
//!
//! The recovery core reads task state (status, retry count, agent, creation
//! time) and writes back the outcome of a recovery. Persistence itself lives
//! outside this workspace; `InMemoryTaskStore` backs the CLI and tests.

use crate::error::StoreError;
use crate::types::{GoalId, TaskId, TaskRecord, WorkspaceId};
use async_trait::async_trait;
use dashmap::DashMap;

/// Read/write access to task records
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch one task
    async fn get_task(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Insert a new task
    async fn create_task(&self, task: TaskRecord) -> Result<(), StoreError>;

    /// Replace an existing task
    async fn update_task(&self, task: TaskRecord) -> Result<(), StoreError>;

    /// Every task in a workspace
    async fn list_workspace_tasks(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    /// Every task serving a goal
    async fn list_goal_tasks(&self, goal_id: &GoalId) -> Result<Vec<TaskRecord>, StoreError>;
}

/// Concurrent in-process task store
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, TaskRecord>,
}

impl InMemoryTaskStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store seeded with tasks
    #[must_use]
    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskRecord>) -> Self {
        let store = Self::new();
        for task in tasks {
            store.tasks.insert(task.id.clone(), task);
        }
        store
    }

    /// Insert or overwrite without existence checks
    pub fn upsert(&self, task: TaskRecord) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Synchronous read, for assertions
    #[must_use]
    pub fn snapshot(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }

    /// Number of stored tasks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, task_id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.snapshot(task_id))
    }

    async fn create_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        match self.tasks.entry(task.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::AlreadyExists(task.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(task);
                Ok(())
            }
        }
    }

    async fn update_task(&self, task: TaskRecord) -> Result<(), StoreError> {
        match self.tasks.get_mut(&task.id) {
            Some(mut entry) => {
                *entry = task;
                Ok(())
            }
            None => Err(StoreError::NotFound(task.id)),
        }
    }

    async fn list_workspace_tasks(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| &entry.workspace_id == workspace_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn list_goal_tasks(&self, goal_id: &GoalId) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.goal_id.as_ref() == Some(goal_id))
            .map(|entry| entry.value().clone())
            .collect())
    }
}
