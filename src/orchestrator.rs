//! The workflow orchestrator service
//!
//! Reacts to task lifecycle events and drives a workflow's tasks forward.
//! Every public method is written to be safe under at-least-once delivery:
//! re-delivering an event that was already applied must converge rather
//! than error, while genuinely invalid calls (unknown id, forbidden
//! transition) must still surface as errors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, StoreError};
use crate::repository::{TaskRepository, WorkflowRepository};
use crate::status::{TaskStatus, WorkflowStatus};
use crate::workflow::Workflow;
use crate::workqueue::{TaskReadyMessage, WorkQueue};

/// Read-only projection of a workflow returned by `getWorkflow`/`listWorkflows`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub id: Uuid,
    pub status: WorkflowStatus,
    pub progress: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub tasks_count: usize,
}

fn to_snapshot(workflow: &Workflow) -> WorkflowSnapshot {
    let progress = workflow.get_progress();
    WorkflowSnapshot {
        id: workflow.id,
        status: workflow.status,
        progress: progress.percent_complete(),
        started_at: workflow.started_at,
        completed_at: workflow.completed_at,
        duration_seconds: workflow
            .execution_duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0),
        tasks_count: progress.total,
    }
}

/// Default cap on `list_workflows`' page size
const MAX_LIST_WORKFLOWS_LIMIT: usize = 1000;

/// Coordinates task scheduling for all workflows sharing one repository pair
///
/// Holds no per-workflow state itself; every method reloads the workflow (and
/// its tasks) from the repository, mutates in memory, and saves back. Callers
/// needing true single-writer semantics under concurrent events for the same
/// workflow must serialize access externally (e.g. per-workflow row lock in
/// `store::postgres`, or an application-level mutex keyed by workflow id) -
/// see the concurrency model notes.
pub struct WorkflowOrchestrator {
    workflows: Arc<dyn WorkflowRepository>,
    tasks: Arc<dyn TaskRepository>,
    queue: Arc<dyn WorkQueue>,
}

impl WorkflowOrchestrator {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        tasks: Arc<dyn TaskRepository>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            workflows,
            tasks,
            queue,
        }
    }

    /// Load the workflow aggregate and refresh its embedded tasks from
    /// `TaskRepository` - scheduling mutates tasks there directly, so the
    /// aggregate's own copies would otherwise read stale statuses
    async fn load_workflow(&self, workflow_id: Uuid) -> Result<Workflow, OrchestratorError> {
        let mut workflow = self
            .workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or(OrchestratorError::NotFound {
                kind: "workflow",
                id: workflow_id,
            })?;
        for task in self.tasks.find_by_workflow(workflow_id).await? {
            workflow.sync_task(task);
        }
        Ok(workflow)
    }

    /// Move a draft/pending workflow to running and publish its root tasks
    #[instrument(skip(self))]
    pub async fn start(&self, workflow_id: Uuid) -> Result<(), OrchestratorError> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        if workflow.status.is_active() {
            // Already running: duplicate start request, converge quietly.
            return Ok(());
        }
        workflow.start()?;
        self.workflows.save(&workflow).await?;
        self.schedule_ready_tasks(&workflow).await?;
        info!(%workflow_id, "workflow started");
        Ok(())
    }

    /// Publish every currently-ready task that is still `pending`
    ///
    /// Queries the indexed repository method rather than scanning the
    /// in-memory `Workflow::get_ready_tasks` - the latter is still kept as
    /// the canonical algorithm (used by entity-level tests and by callers
    /// that already hold the whole aggregate), this is the scheduler's
    /// efficient path.
    async fn schedule_ready_tasks(&self, workflow: &Workflow) -> Result<(), OrchestratorError> {
        if workflow.status != WorkflowStatus::Running {
            debug!(workflow_id = %workflow.id, status = %workflow.status, "not scheduling: workflow is not running");
            return Ok(());
        }
        for mut task in self.tasks.get_ready_tasks(workflow.id).await? {
            task.queue()?;
            self.tasks.save(&task).await?;
            self.queue
                .publish(TaskReadyMessage {
                    task_id: task.id,
                    workflow_id: workflow.id,
                    attempt: task.retry_count,
                })
                .await?;
        }
        Ok(())
    }

    /// React to a worker reporting a task succeeded
    ///
    /// Idempotent: replays of the same `(task_id, result)` pair after the
    /// task already succeeded are convergence events, not errors.
    #[instrument(skip(self, result))]
    pub async fn on_task_completed(
        &self,
        workflow_id: Uuid,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), OrchestratorError> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        let task = workflow
            .get_task_mut(task_id)
            .ok_or(OrchestratorError::NotFound {
                kind: "task",
                id: task_id,
            })?;
        task.start_if_queued();
        task.complete(result)?;
        let task = task.clone();
        self.tasks.save(&task).await?;
        self.workflows.save(&workflow).await?;

        if workflow.all_tasks_terminal() {
            self.finish_workflow(workflow).await?;
        } else {
            self.schedule_ready_tasks(&workflow).await?;
        }
        Ok(())
    }

    /// React to a worker reporting a task failed
    ///
    /// Retries in place when the task's policy allows it; otherwise fails
    /// the task terminally and lets `finish_workflow` decide the workflow's
    /// fate (fail outright, or move into compensation).
    #[instrument(skip(self, error))]
    pub async fn on_task_failed(
        &self,
        workflow_id: Uuid,
        task_id: Uuid,
        error: String,
    ) -> Result<(), OrchestratorError> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        let task = workflow
            .get_task_mut(task_id)
            .ok_or(OrchestratorError::NotFound {
                kind: "task",
                id: task_id,
            })?;
        task.start_if_queued();
        task.fail(error)?;
        let task = task.clone();
        self.tasks.save(&task).await?;
        self.workflows.save(&workflow).await?;

        if task.status == TaskStatus::Retrying {
            let delay = task.next_retry_delay();
            self.queue
                .publish_delayed(
                    TaskReadyMessage {
                        task_id: task.id,
                        workflow_id,
                        attempt: task.retry_count,
                    },
                    delay,
                )
                .await?;
            warn!(%workflow_id, %task_id, retry_count = task.retry_count, "task failed, scheduled retry");
            return Ok(());
        }

        self.finish_workflow(workflow).await
    }

    /// React to the recovery sweep finding a task stuck past its timeout
    ///
    /// Transitions the task to `timeout` first, then either revives it
    /// straight to `running` (if retries remain) or leaves it in `timeout`
    /// for `finish_workflow` to treat as a workflow-level failure.
    #[instrument(skip(self))]
    pub async fn on_task_timeout(
        &self,
        workflow_id: Uuid,
        task_id: Uuid,
    ) -> Result<(), OrchestratorError> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        let task = workflow
            .get_task_mut(task_id)
            .ok_or(OrchestratorError::NotFound {
                kind: "task",
                id: task_id,
            })?;
        task.timeout()?;

        if task.can_retry() {
            task.retry()?;
            let task = task.clone();
            self.tasks.save(&task).await?;
            self.workflows.save(&workflow).await?;
            self.queue
                .publish(TaskReadyMessage {
                    task_id: task.id,
                    workflow_id,
                    attempt: task.retry_count,
                })
                .await?;
            warn!(%workflow_id, %task_id, retry_count = task.retry_count, "task timed out, revived for another attempt");
            return Ok(());
        }

        let task = task.clone();
        self.tasks.save(&task).await?;
        self.workflows.save(&workflow).await?;
        self.finish_workflow(workflow).await
    }

    /// Decide and apply the workflow's terminal/compensating status once no
    /// more forward progress is possible
    async fn finish_workflow(&self, mut workflow: Workflow) -> Result<(), OrchestratorError> {
        if workflow.status.is_terminal() {
            return Ok(());
        }
        if workflow.any_task_failed() {
            let reason = workflow
                .first_failing_task()
                .map(|t| {
                    format!(
                        "task '{}' {}: {}",
                        t.name,
                        t.status,
                        t.error.clone().unwrap_or_else(|| "unknown error".into())
                    )
                })
                .unwrap_or_else(|| "a task failed".to_string());
            workflow.fail(reason)?;
            self.workflows.save(&workflow).await?;
            warn!(workflow_id = %workflow.id, "workflow failed");
            if workflow.tasks().any(|t| t.compensation_task_id.is_some()) {
                workflow.start_compensation()?;
                self.workflows.save(&workflow).await?;
                info!(workflow_id = %workflow.id, "workflow entering compensation");
            }
        } else if workflow.all_tasks_terminal() {
            workflow.complete()?;
            self.workflows.save(&workflow).await?;
            info!(workflow_id = %workflow.id, "workflow succeeded");
        }
        Ok(())
    }

    /// Stop scheduling new tasks without disturbing tasks already running
    #[instrument(skip(self))]
    pub async fn pause(&self, workflow_id: Uuid) -> Result<(), OrchestratorError> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        if workflow.status == WorkflowStatus::Paused {
            return Ok(());
        }
        workflow.pause()?;
        self.workflows.save(&workflow).await
    }

    /// Resume scheduling and immediately publish any tasks that became ready while paused
    #[instrument(skip(self))]
    pub async fn resume(&self, workflow_id: Uuid) -> Result<(), OrchestratorError> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        if workflow.status == WorkflowStatus::Running {
            return Ok(());
        }
        workflow.resume()?;
        self.workflows.save(&workflow).await?;
        self.schedule_ready_tasks(&workflow).await
    }

    /// Cancel the workflow and every task not already in a terminal status
    #[instrument(skip(self))]
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<(), OrchestratorError> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        workflow.cancel()?;
        self.workflows.save(&workflow).await?;

        let task_ids: Vec<Uuid> = workflow.tasks().map(|t| t.id).collect();
        for id in task_ids {
            if let Some(task) = workflow.get_task_mut(id) {
                if !task.status.is_terminal() {
                    task.cancel()?;
                    let task = task.clone();
                    self.tasks.save(&task).await?;
                }
            }
        }
        self.workflows.save(&workflow).await?;
        Ok(())
    }

    /// Read-only status/progress projection of one workflow
    #[instrument(skip(self))]
    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowSnapshot, OrchestratorError> {
        let workflow = self.load_workflow(workflow_id).await?;
        Ok(to_snapshot(&workflow))
    }

    /// Snapshots of every workflow, newest-created first
    #[instrument(skip(self))]
    pub async fn list_workflows(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WorkflowSnapshot>, OrchestratorError> {
        let limit = limit.min(MAX_LIST_WORKFLOWS_LIMIT);
        let workflows = self.workflows.get_all(limit, offset).await?;
        Ok(workflows.iter().map(to_snapshot).collect())
    }

    /// Surfaced separately from `StoreError` so the caller's recovery loop
    /// can distinguish "genuinely gone" from other store failures
    pub fn is_not_found(err: &OrchestratorError) -> bool {
        matches!(
            err,
            OrchestratorError::NotFound { .. }
                | OrchestratorError::Store(StoreError::WorkflowNotFound(_))
                | OrchestratorError::Store(StoreError::TaskNotFound(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_workflow::{CreateWorkflowUseCase, TaskSpec, WorkflowSpec};
    use crate::retry::RetryPolicy;
    use crate::store::InMemoryStore;
    use crate::task::{Priority, TaskType};
    use crate::workqueue::InProcessWorkQueue;
    use std::time::Duration;

    fn task_spec(name: &str, retries: u32, depends_on: Vec<usize>) -> TaskSpec {
        TaskSpec {
            name: name.into(),
            task_type: TaskType::Http,
            timeout_seconds: 30,
            priority: Priority::Normal,
            retry_policy: RetryPolicy::fixed_delay(retries, Duration::from_millis(1)),
            idempotency_key: None,
            max_parallel_instances: 1,
            payload: serde_json::json!({}),
            depends_on,
        }
    }

    async fn harness() -> (WorkflowOrchestrator, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let (queue, _rx) = InProcessWorkQueue::new(16);
        let orchestrator = WorkflowOrchestrator::new(store.clone(), store.clone(), Arc::new(queue));
        (orchestrator, store)
    }

    #[tokio::test]
    async fn linear_chain_completes_end_to_end() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let spec = WorkflowSpec {
            name: "chain".into(),
            description: None,
            execution_mode: None,
            metadata: serde_json::json!({}),
            tasks: vec![task_spec("a", 0, vec![]), task_spec("b", 0, vec![0])],
        };
        let workflow = use_case.execute(spec).await.unwrap();
        orchestrator.start(workflow.id).await.unwrap();

        let tasks = store.find_by_workflow(workflow.id).await.unwrap();
        let a = tasks.iter().find(|t| t.name == "a").unwrap().clone();
        orchestrator
            .on_task_completed(workflow.id, a.id, serde_json::json!(null))
            .await
            .unwrap();

        let tasks = store.find_by_workflow(workflow.id).await.unwrap();
        let b = tasks.iter().find(|t| t.name == "b").unwrap().clone();
        assert_eq!(b.status, crate::status::TaskStatus::Queued);

        orchestrator
            .on_task_completed(workflow.id, b.id, serde_json::json!(null))
            .await
            .unwrap();

        let workflow = store.find_by_id(workflow.id).await.unwrap().unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Succeeded);
    }

    #[tokio::test]
    async fn retry_exhausted_fails_the_workflow() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let spec = WorkflowSpec {
            name: "flaky".into(),
            description: None,
            execution_mode: None,
            metadata: serde_json::json!({}),
            tasks: vec![task_spec("a", 0, vec![])],
        };
        let workflow = use_case.execute(spec).await.unwrap();
        orchestrator.start(workflow.id).await.unwrap();
        let a = store.find_by_workflow(workflow.id).await.unwrap()[0].clone();

        orchestrator
            .on_task_failed(workflow.id, a.id, "boom".into())
            .await
            .unwrap();

        let workflow = store.find_by_id(workflow.id).await.unwrap().unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn duplicate_completion_event_converges() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let spec = WorkflowSpec {
            name: "single".into(),
            description: None,
            execution_mode: None,
            metadata: serde_json::json!({}),
            tasks: vec![task_spec("a", 0, vec![])],
        };
        let workflow = use_case.execute(spec).await.unwrap();
        orchestrator.start(workflow.id).await.unwrap();
        let a = store.find_by_workflow(workflow.id).await.unwrap()[0].clone();

        orchestrator
            .on_task_completed(workflow.id, a.id, serde_json::json!(1))
            .await
            .unwrap();
        // Replay of the same completion event must not error.
        orchestrator
            .on_task_completed(workflow.id, a.id, serde_json::json!(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pause_blocks_scheduling_of_newly_ready_tasks() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let spec = WorkflowSpec {
            name: "chain".into(),
            description: None,
            execution_mode: None,
            metadata: serde_json::json!({}),
            tasks: vec![task_spec("a", 0, vec![]), task_spec("b", 0, vec![0])],
        };
        let workflow = use_case.execute(spec).await.unwrap();
        orchestrator.start(workflow.id).await.unwrap();
        orchestrator.pause(workflow.id).await.unwrap();

        let a = store.find_by_workflow(workflow.id).await.unwrap()
            .into_iter()
            .find(|t| t.name == "a")
            .unwrap();
        orchestrator
            .on_task_completed(workflow.id, a.id, serde_json::json!(null))
            .await
            .unwrap();

        let b = store.find_by_workflow(workflow.id).await.unwrap()
            .into_iter()
            .find(|t| t.name == "b")
            .unwrap();
        assert_eq!(b.status, crate::status::TaskStatus::Pending);

        orchestrator.resume(workflow.id).await.unwrap();
        let b = store.find_by_workflow(workflow.id).await.unwrap()
            .into_iter()
            .find(|t| t.name == "b")
            .unwrap();
        assert_eq!(b.status, crate::status::TaskStatus::Queued);
    }

    #[tokio::test]
    async fn get_workflow_reports_status_and_progress() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let spec = WorkflowSpec {
            name: "chain".into(),
            description: None,
            execution_mode: None,
            metadata: serde_json::json!({}),
            tasks: vec![task_spec("a", 0, vec![]), task_spec("b", 0, vec![0])],
        };
        let workflow = use_case.execute(spec).await.unwrap();
        orchestrator.start(workflow.id).await.unwrap();

        let snapshot = orchestrator.get_workflow(workflow.id).await.unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Running);
        assert_eq!(snapshot.tasks_count, 2);
        assert!((snapshot.progress - 0.0).abs() < f64::EPSILON);

        let a = store.find_by_workflow(workflow.id).await.unwrap()[0].clone();
        orchestrator
            .on_task_completed(workflow.id, a.id, serde_json::json!(null))
            .await
            .unwrap();
        let snapshot = orchestrator.get_workflow(workflow.id).await.unwrap();
        assert!((snapshot.progress - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn list_workflows_returns_newest_first_and_honors_limit() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let mut ids = Vec::new();
        for i in 0..3 {
            let spec = WorkflowSpec {
                name: format!("wf-{i}"),
                description: None,
                execution_mode: None,
                metadata: serde_json::json!({}),
                tasks: vec![task_spec("a", 0, vec![])],
            };
            ids.push(use_case.execute(spec).await.unwrap().id);
        }

        let page = orchestrator.list_workflows(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[2]);
    }

    #[tokio::test]
    async fn task_timeout_revives_when_retries_remain() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let spec = WorkflowSpec {
            name: "slow".into(),
            description: None,
            execution_mode: None,
            metadata: serde_json::json!({}),
            tasks: vec![task_spec("a", 1, vec![])],
        };
        let workflow = use_case.execute(spec).await.unwrap();
        orchestrator.start(workflow.id).await.unwrap();
        let mut a = store.find_by_workflow(workflow.id).await.unwrap()[0].clone();
        a.start().unwrap();
        TaskRepository::save(&*store, &a).await.unwrap();

        orchestrator
            .on_task_timeout(workflow.id, a.id)
            .await
            .unwrap();

        let a = store.find_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(a.status, crate::status::TaskStatus::Running);
        assert_eq!(a.retry_count, 1);

        let workflow = store.find_by_id(workflow.id).await.unwrap().unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn task_timeout_without_retries_fails_the_workflow() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let spec = WorkflowSpec {
            name: "slow".into(),
            description: None,
            execution_mode: None,
            metadata: serde_json::json!({}),
            tasks: vec![task_spec("a", 0, vec![])],
        };
        let workflow = use_case.execute(spec).await.unwrap();
        orchestrator.start(workflow.id).await.unwrap();
        let a = store.find_by_workflow(workflow.id).await.unwrap()[0].clone();

        orchestrator
            .on_task_timeout(workflow.id, a.id)
            .await
            .unwrap();

        let a = store.find_by_id(a.id).await.unwrap().unwrap();
        assert_eq!(a.status, crate::status::TaskStatus::Timeout);

        let workflow = store.find_by_id(workflow.id).await.unwrap().unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Failed);
        assert!(workflow.error.is_some());
    }

    #[tokio::test]
    async fn cancel_during_execution_cancels_remaining_tasks() {
        let (orchestrator, store) = harness().await;
        let use_case = CreateWorkflowUseCase::new(store.clone(), store.clone());
        let spec = WorkflowSpec {
            name: "chain".into(),
            description: None,
            execution_mode: None,
            metadata: serde_json::json!({}),
            tasks: vec![task_spec("a", 0, vec![]), task_spec("b", 0, vec![0])],
        };
        let workflow = use_case.execute(spec).await.unwrap();
        orchestrator.start(workflow.id).await.unwrap();
        orchestrator.cancel(workflow.id).await.unwrap();

        let workflow = store.find_by_id(workflow.id).await.unwrap().unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Cancelled);
        assert!(workflow.tasks().all(|t| t.status.is_terminal()));
    }
}
