//! Workflow creation use case
//!
//! Validates a caller-supplied workflow specification (topology, per-task
//! config) and constructs the `Workflow`/`Task` aggregate before it is ever
//! persisted, so the repository layer never has to reject malformed
//! structures of its own accord.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{OrchestratorError, ValidationError};
use crate::repository::{TaskRepository, WorkflowRepository};
use crate::retry::RetryPolicy;
use crate::task::{Priority, Task, TaskConfig, TaskType};
use crate::workflow::{ExecutionMode, Workflow};

/// Caller-supplied shape for one task in a new workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub task_type: TaskType,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "RetryPolicy::exponential_default")]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default = "default_parallelism")]
    pub max_parallel_instances: u32,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Indices into the enclosing `WorkflowSpec::tasks` this task depends on
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

fn default_parallelism() -> u32 {
    1
}

/// Caller-supplied shape for a new workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub tasks: Vec<TaskSpec>,
}

/// Builds and persists a new `Workflow` in `draft`, ready for `WorkflowOrchestrator::start`
pub struct CreateWorkflowUseCase {
    workflows: Arc<dyn WorkflowRepository>,
    tasks: Arc<dyn TaskRepository>,
}

impl CreateWorkflowUseCase {
    pub fn new(workflows: Arc<dyn WorkflowRepository>, tasks: Arc<dyn TaskRepository>) -> Self {
        Self { workflows, tasks }
    }

    #[instrument(skip(self, spec))]
    pub async fn execute(&self, spec: WorkflowSpec) -> Result<Workflow, OrchestratorError> {
        self.execute_nested(spec, None, 0).await
    }

    /// Used when a `Subworkflow`-typed task spawns a child workflow
    #[instrument(skip(self, spec))]
    pub async fn execute_nested(
        &self,
        spec: WorkflowSpec,
        parent_workflow_id: Option<Uuid>,
        depth: u32,
    ) -> Result<Workflow, OrchestratorError> {
        if spec.tasks.is_empty() {
            return Err(ValidationError::EmptyWorkflow.into());
        }
        for t in &spec.tasks {
            if !t.task_type.is_schedulable() {
                return Err(ValidationError::UnsupportedTaskType {
                    task_type: format!("{:?}", t.task_type),
                }
                .into());
            }
            for &dep_index in &t.depends_on {
                if dep_index >= spec.tasks.len() {
                    return Err(ValidationError::DependencyIndexOutOfRange {
                        index: dep_index,
                        task_count: spec.tasks.len(),
                    }
                    .into());
                }
            }
        }

        let mut workflow = Workflow::new(
            spec.name,
            spec.description,
            spec.execution_mode.unwrap_or(ExecutionMode::Dag),
            parent_workflow_id,
            depth,
            spec.metadata,
        );

        // First pass assigns every task a stable id so dependency indices
        // can resolve to real ids on the second pass.
        let mut task_ids = Vec::with_capacity(spec.tasks.len());
        let mut built_tasks = Vec::with_capacity(spec.tasks.len());
        for t in &spec.tasks {
            let config = TaskConfig::new(
                t.task_type,
                t.timeout_seconds,
                t.priority,
                t.retry_policy,
                t.idempotency_key.clone(),
                t.max_parallel_instances,
            )?;
            let task = Task::new(workflow.id, t.name.clone(), config, t.payload.clone(), HashSet::new());
            task_ids.push(task.id);
            built_tasks.push(task);
        }

        for (task, spec_task) in built_tasks.iter_mut().zip(&spec.tasks) {
            task.dependencies = spec_task
                .depends_on
                .iter()
                .map(|&i| task_ids[i])
                .collect();
        }

        for task in built_tasks {
            workflow.add_task(task)?;
        }

        self.workflows.save(&workflow).await?;
        let tasks: Vec<Task> = workflow.tasks().cloned().collect();
        self.tasks.save_many(&tasks).await?;

        Ok(workflow)
    }
}
