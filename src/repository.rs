//! Repository contracts
//!
//! Abstract persistence ports, implemented by `store::memory` for tests and
//! `store::postgres` for production: a trait split from its two concrete
//! backends.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::status::TaskStatus;
use crate::task::Task;
use crate::workflow::Workflow;

/// Persistence port for workflows
///
/// Implementations must make `save` an upsert: callers rely on being able to
/// call it repeatedly for the same `Workflow::id` as its status advances.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Workflow>, StoreError>;

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Workflows currently `running` or `paused`, used by the recovery sweep
    /// to find workflows that may have tasks needing reconciliation
    async fn find_active(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Child workflows spawned from `parent_id` (subworkflow support)
    async fn find_by_parent(&self, parent_id: Uuid) -> Result<Vec<Workflow>, StoreError>;

    /// Every workflow, newest-created first, paginated - backs `listWorkflows`
    async fn get_all(&self, limit: usize, offset: usize) -> Result<Vec<Workflow>, StoreError>;
}

/// Persistence port for tasks
///
/// Tasks are stored independently of their owning workflow's document so
/// the orchestrator can update a single task's status without rewriting the
/// whole workflow aggregate under concurrent access.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn save(&self, task: &Task) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    async fn find_by_workflow(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError>;

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Save every task in one call; implementations should make this atomic
    /// where the backing store supports it (used by `CreateWorkflowUseCase`
    /// to persist a new workflow's tasks together)
    async fn save_many(&self, tasks: &[Task]) -> Result<(), StoreError>;

    /// Batch point lookup, in no particular order; missing ids are simply absent
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Task>, StoreError>;

    /// Tasks in a given status across all workflows, newest-updated first, capped at `limit`
    async fn get_by_status(&self, status: TaskStatus, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// Tasks belonging to `workflow_id` that are `pending` with every
    /// dependency satisfied - the indexed counterpart to
    /// `Workflow::get_ready_tasks`, used by the orchestrator's scheduler so
    /// it doesn't need the whole workflow document in memory
    async fn get_ready_tasks(&self, workflow_id: Uuid) -> Result<Vec<Task>, StoreError>;

    /// Tasks stuck in `running` past their timeout, across all workflows -
    /// feeds the recovery sweep's timeout reclamation
    async fn find_stale_running(
        &self,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Task>, StoreError>;

    /// Tasks stuck in `queued` past a grace period - feeds the recovery
    /// sweep's requeue reclamation for tasks the work queue silently dropped
    async fn find_stale_queued(
        &self,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Task>, StoreError>;
}
