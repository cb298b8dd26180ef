//! In-memory repository implementation, for tests and local demos

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::StoreError;
use crate::repository::{TaskRepository, WorkflowRepository};
use crate::status::TaskStatus;
use crate::task::Task;
use crate::workflow::Workflow;

/// Single process-local store backing both repository ports
///
/// Sharded concurrent maps rather than one lock per collection, so
/// independent workflows don't contend on a single `RwLock` - the `find_*`
/// scans are still O(n) over the whole table, though. `store::postgres` is
/// the one meant to hold up under real concurrent load.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    workflows: DashMap<Uuid, Workflow>,
    tasks: DashMap<Uuid, Task>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryStore {
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.get(&id).map(|w| w.clone()))
    }

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.workflows.contains_key(&id))
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.workflows.remove(&id);
        self.tasks.retain(|_, t| t.workflow_id != id);
        Ok(())
    }

    async fn find_active(&self) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .workflows
            .iter()
            .filter(|w| w.status.is_active() || w.status == crate::status::WorkflowStatus::Paused)
            .map(|w| w.clone())
            .collect())
    }

    async fn find_by_parent(&self, parent_id: Uuid) -> Result<Vec<Workflow>, StoreError> {
        Ok(self
            .workflows
            .iter()
            .filter(|w| w.parent_workflow_id == Some(parent_id))
            .map(|w| w.clone())
            .collect())
    }

    async fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Workflow>, StoreError> {
        let mut all: Vec<Workflow> = self.workflows.iter().map(|w| w.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn find_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.workflow_id == workflow_id)
            .map(|t| t.clone())
            .collect())
    }

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tasks.contains_key(&id))
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.tasks.remove(&id);
        Ok(())
    }

    async fn save_many(&self, tasks: &[Task]) -> Result<(), StoreError> {
        for task in tasks {
            self.tasks.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Task>, StoreError> {
        Ok(ids.iter().filter_map(|id| self.tasks.get(id).map(|t| t.clone())).collect())
    }

    async fn get_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>, StoreError> {
        let mut matching: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.clone())
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matching.truncate(limit);
        Ok(matching)
    }

    /// Mirrors `Workflow::get_ready_tasks`, computed over the repository's
    /// own copies of the tasks rather than an in-memory aggregate
    async fn get_ready_tasks(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let all: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.workflow_id == workflow_id)
            .map(|t| t.clone())
            .collect();
        let completed: std::collections::HashSet<Uuid> = all
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Succeeded | TaskStatus::Skipped))
            .map(|t| t.id)
            .collect();
        Ok(all
            .into_iter()
            .filter(|t| t.is_ready_to_execute(&completed))
            .collect())
    }

    async fn find_stale_running(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Running
                    && t.started_at.map(|s| s < older_than).unwrap_or(false)
            })
            .map(|t| t.clone())
            .collect())
    }

    async fn find_stale_queued(&self, older_than: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Queued && t.updated_at < older_than)
            .map(|t| t.clone())
            .collect())
    }
}
