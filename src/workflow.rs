//! Workflow entity: the aggregate root owning a DAG of tasks

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EntityError;
use crate::status::{TaskStatus, WorkflowStatus};
use crate::task::Task;

/// How the task graph is meant to be walked
///
/// The orchestrator schedules strictly by dependency readiness regardless of
/// this field; `execution_mode` is metadata describing the author's intent
/// (and is enforced by `CreateWorkflowUseCase` validation — e.g. `Sequential`
/// workflows may not declare fan-out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Dag,
}

/// Maximum nesting depth for subworkflows (`parent_workflow_id` chains)
pub const MAX_WORKFLOW_DEPTH: u32 = 10;
/// Maximum number of tasks a single workflow may hold
pub const MAX_TASKS_PER_WORKFLOW: usize = 1000;

/// Progress snapshot returned by `get_progress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
}

impl Progress {
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let done = self.succeeded + self.failed;
        (done as f64 / self.total as f64) * 100.0
    }
}

/// The aggregate root: a named DAG of tasks plus its own lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub execution_mode: ExecutionMode,
    pub parent_workflow_id: Option<Uuid>,
    pub depth: u32,
    pub metadata: serde_json::Value,
    pub status: WorkflowStatus,
    pub error: Option<String>,
    tasks: HashMap<Uuid, Task>,
    /// Insertion order, preserved for deterministic iteration (root-task
    /// ordering, progress reporting) independent of `HashMap` iteration order
    task_order: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        execution_mode: ExecutionMode,
        parent_workflow_id: Option<Uuid>,
        depth: u32,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description,
            execution_mode,
            parent_workflow_id,
            depth,
            metadata,
            status: WorkflowStatus::Draft,
            error: None,
            tasks: HashMap::new(),
            task_order: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    fn mark_updated(&mut self) {
        self.updated_at = Utc::now();
    }

    fn guard(&self, allowed: bool, operation: &'static str) -> Result<(), EntityError> {
        if allowed {
            Ok(())
        } else {
            Err(EntityError::InvalidTransition {
                operation,
                state: status_name(self.status),
            })
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.task_order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn get_task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_task_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Overwrite the aggregate's view of one already-known task
    ///
    /// Used to pull in mutations applied directly through `TaskRepository`
    /// (e.g. queuing during scheduling) before the aggregate itself is read
    /// or mutated again.
    pub fn sync_task(&mut self, task: Task) {
        if self.tasks.contains_key(&task.id) {
            self.tasks.insert(task.id, task);
        }
    }

    /// Add a task to the DAG, validating cycle-freedom, known dependencies,
    /// and the workflow-wide size/depth caps
    pub fn add_task(&mut self, task: Task) -> Result<(), EntityError> {
        self.guard(self.status == WorkflowStatus::Draft, "add_task")?;

        if self.depth > MAX_WORKFLOW_DEPTH {
            return Err(EntityError::MaxDepthExceeded {
                depth: self.depth,
                max: MAX_WORKFLOW_DEPTH,
            });
        }
        if self.tasks.len() >= MAX_TASKS_PER_WORKFLOW {
            return Err(EntityError::TooManyTasks {
                max: MAX_TASKS_PER_WORKFLOW,
            });
        }
        for dep in &task.dependencies {
            if !self.tasks.contains_key(dep) {
                return Err(EntityError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: *dep,
                });
            }
        }
        if self.creates_cycle(task.id, &task.dependencies) {
            return Err(EntityError::CircularDependency {
                task: task.name.clone(),
            });
        }

        self.task_order.push(task.id);
        self.tasks.insert(task.id, task);
        self.mark_updated();
        Ok(())
    }

    pub fn remove_task(&mut self, task_id: Uuid) -> Result<(), EntityError> {
        self.guard(self.status == WorkflowStatus::Draft, "remove_task")?;
        if self.tasks.remove(&task_id).is_some() {
            self.task_order.retain(|id| *id != task_id);
            // Dangling dependency references are left for add_task's
            // unknown-dependency guard to catch on the next mutation -
            // removal never happens once tasks reference each other in a
            // non-draft workflow, since topology is frozen by then.
            for t in self.tasks.values_mut() {
                t.dependencies.remove(&task_id);
            }
            self.mark_updated();
        }
        Ok(())
    }

    /// DFS cycle check: would adding an edge from each of `new_deps` into
    /// `new_task_id` create a cycle, treating `new_task_id` as already
    /// present in the graph (it may not be inserted yet)
    fn creates_cycle(&self, new_task_id: Uuid, new_deps: &HashSet<Uuid>) -> bool {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        fn visit(
            node: Uuid,
            tasks: &HashMap<Uuid, Task>,
            new_task_id: Uuid,
            new_deps: &HashSet<Uuid>,
            visited: &mut HashSet<Uuid>,
            rec_stack: &mut HashSet<Uuid>,
        ) -> bool {
            if rec_stack.contains(&node) {
                return true;
            }
            if visited.contains(&node) {
                return false;
            }
            visited.insert(node);
            rec_stack.insert(node);

            let deps: Option<&HashSet<Uuid>> = if node == new_task_id {
                Some(new_deps)
            } else {
                tasks.get(&node).map(|t| &t.dependencies)
            };
            if let Some(deps) = deps {
                for &dep in deps {
                    if visit(dep, tasks, new_task_id, new_deps, visited, rec_stack) {
                        return true;
                    }
                }
            }

            rec_stack.remove(&node);
            false
        }

        visit(
            new_task_id,
            &self.tasks,
            new_task_id,
            new_deps,
            &mut visited,
            &mut rec_stack,
        )
    }

    /// Tasks with no dependencies at all
    pub fn get_root_tasks(&self) -> Vec<&Task> {
        self.tasks()
            .filter(|t| !t.has_dependencies())
            .collect()
    }

    /// Tasks that directly depend on `task_id`
    pub fn get_dependent_tasks(&self, task_id: Uuid) -> Vec<&Task> {
        self.tasks()
            .filter(|t| t.dependencies.contains(&task_id))
            .collect()
    }

    /// Tasks whose dependencies have all succeeded (or been skipped) and
    /// which are themselves still `Pending`
    pub fn get_ready_tasks(&self) -> Vec<&Task> {
        let completed: HashSet<Uuid> = self
            .tasks()
            .filter(|t| matches!(t.status, TaskStatus::Succeeded | TaskStatus::Skipped))
            .map(|t| t.id)
            .collect();
        self.tasks()
            .filter(|t| t.is_ready_to_execute(&completed))
            .collect()
    }

    pub fn get_progress(&self) -> Progress {
        let mut progress = Progress {
            total: self.tasks.len(),
            succeeded: 0,
            failed: 0,
            running: 0,
            pending: 0,
        };
        for t in self.tasks() {
            match t.status {
                TaskStatus::Succeeded | TaskStatus::Skipped => progress.succeeded += 1,
                TaskStatus::Failed | TaskStatus::Cancelled => progress.failed += 1,
                s if s.is_active() => progress.running += 1,
                _ => progress.pending += 1,
            }
        }
        progress
    }

    /// Every non-skipped task reached a terminal status
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks().all(|t| t.status.is_terminal())
    }

    pub fn any_task_failed(&self) -> bool {
        self.tasks()
            .any(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Timeout))
    }

    pub fn start(&mut self) -> Result<(), EntityError> {
        self.guard(
            matches!(self.status, WorkflowStatus::Draft | WorkflowStatus::Pending),
            "start",
        )?;
        self.status = WorkflowStatus::Running;
        self.started_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    /// All tasks succeeded: converges to terminal `Succeeded`
    pub fn complete(&mut self) -> Result<(), EntityError> {
        if self.status == WorkflowStatus::Succeeded {
            return Ok(());
        }
        self.guard(self.status.is_active(), "complete")?;
        self.status = WorkflowStatus::Succeeded;
        self.completed_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), EntityError> {
        if self.status == WorkflowStatus::Failed {
            return Ok(());
        }
        self.guard(!self.status.is_terminal(), "fail")?;
        self.status = WorkflowStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    /// The task whose failure/timeout should be reported as the workflow's
    /// own failure reason, if any task has reached one of those statuses
    pub fn first_failing_task(&self) -> Option<&Task> {
        self.tasks()
            .find(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Timeout))
    }

    pub fn pause(&mut self) -> Result<(), EntityError> {
        self.guard(self.status.can_pause(), "pause")?;
        self.status = WorkflowStatus::Paused;
        self.mark_updated();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), EntityError> {
        self.guard(self.status.can_resume(), "resume")?;
        self.status = WorkflowStatus::Running;
        self.mark_updated();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), EntityError> {
        if self.status == WorkflowStatus::Cancelled {
            return Ok(());
        }
        self.guard(self.status.can_cancel(), "cancel")?;
        self.status = WorkflowStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    /// Begin Saga rollback after a failure
    pub fn start_compensation(&mut self) -> Result<(), EntityError> {
        self.guard(self.status == WorkflowStatus::Failed, "start_compensation")?;
        self.status = WorkflowStatus::Compensating;
        self.mark_updated();
        Ok(())
    }

    pub fn complete_compensation(&mut self) -> Result<(), EntityError> {
        self.guard(
            self.status == WorkflowStatus::Compensating,
            "complete_compensation",
        )?;
        self.status = WorkflowStatus::Compensated;
        self.completed_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    pub fn execution_duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let completed = self.completed_at.unwrap_or_else(Utc::now);
        Some(completed - started)
    }
}

fn status_name(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Draft => "draft",
        WorkflowStatus::Pending => "pending",
        WorkflowStatus::Running => "running",
        WorkflowStatus::Paused => "paused",
        WorkflowStatus::Succeeded => "succeeded",
        WorkflowStatus::Failed => "failed",
        WorkflowStatus::Cancelled => "cancelled",
        WorkflowStatus::Compensating => "compensating",
        WorkflowStatus::Compensated => "compensated",
    }
}
