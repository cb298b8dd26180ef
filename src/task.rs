//! Task entity and its configuration value object

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EntityError, ValidationError};
use crate::retry::RetryPolicy;
use crate::status::TaskStatus;

/// What kind of work a task performs
///
/// `Subworkflow` and `Human` are accepted by the data model but not
/// schedulable by this crate's orchestrator yet — neither has a forward
/// path to a "ready" signal. `CreateWorkflowUseCase` rejects them at
/// creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Http,
    Python,
    Shell,
    Sql,
    Webhook,
    Human,
    Subworkflow,
}

impl TaskType {
    /// Task types this crate's orchestrator can actually schedule today
    pub fn is_schedulable(self) -> bool {
        !matches!(self, Self::Human | Self::Subworkflow)
    }
}

/// Scheduling priority, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Static configuration for a task, validated once at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_type: TaskType,
    pub timeout_seconds: u64,
    pub priority: Priority,
    pub retry_policy: RetryPolicy,
    /// When set, duplicate `complete()` calls carrying the same key are
    /// convergence events rather than program errors (see `Task::complete`)
    pub idempotency_key: Option<String>,
    pub max_parallel_instances: u32,
}

impl TaskConfig {
    pub fn new(
        task_type: TaskType,
        timeout_seconds: u64,
        priority: Priority,
        retry_policy: RetryPolicy,
        idempotency_key: Option<String>,
        max_parallel_instances: u32,
    ) -> Result<Self, ValidationError> {
        if timeout_seconds == 0 {
            return Err(ValidationError::NonPositiveTimeout);
        }
        if max_parallel_instances < 1 {
            return Err(ValidationError::NonPositiveParallelism);
        }
        Ok(Self {
            task_type,
            timeout_seconds,
            priority,
            retry_policy,
            idempotency_key,
            max_parallel_instances,
        })
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotency_key.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// A unit of work inside a workflow
///
/// Timestamps are assigned by the entity itself on each transition, never
/// by the caller — this keeps replayed/duplicate calls idempotent: calling
/// `complete()` twice with the same result updates nothing the second time
/// instead of silently re-stamping `completed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub config: TaskConfig,
    pub payload: serde_json::Value,
    pub dependencies: HashSet<Uuid>,
    /// Task to run during Saga compensation if the workflow rolls back
    pub compensation_task_id: Option<Uuid>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        workflow_id: Uuid,
        name: impl Into<String>,
        config: TaskConfig,
        payload: serde_json::Value,
        dependencies: HashSet<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            name: name.into(),
            config,
            payload,
            dependencies,
            compensation_task_id: None,
            status: TaskStatus::Pending,
            retry_count: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    /// Ready once pending and every dependency has succeeded (or been skipped)
    pub fn is_ready_to_execute(&self, completed: &HashSet<Uuid>) -> bool {
        self.status == TaskStatus::Pending && self.dependencies.iter().all(|d| completed.contains(d))
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

    /// Move onto the work queue
    pub fn queue(&mut self) -> Result<(), EntityError> {
        self.guard(self.status == TaskStatus::Pending, "queue")?;
        self.status = TaskStatus::Queued;
        self.mark_updated();
        Ok(())
    }

    /// Begin execution
    pub fn start(&mut self) -> Result<(), EntityError> {
        self.guard(
            matches!(self.status, TaskStatus::Queued | TaskStatus::Retrying),
            "start",
        )?;
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    /// Transition `queued`/`retrying` to `running` if not already there
    ///
    /// The orchestrator calls this before applying a completion/failure
    /// event: a worker that reports a result has implicitly started the
    /// task, even if the `start()` notification was itself dropped.
    pub fn start_if_queued(&mut self) {
        if matches!(self.status, TaskStatus::Queued | TaskStatus::Retrying) {
            let _ = self.start();
        }
    }

    /// Record success
    ///
    /// A duplicate completion delivered for an already-`Succeeded` task with
    /// the same result is treated as a convergence event (returns `Ok(())`
    /// and changes nothing) rather than an `InvalidTransition` error — this
    /// is what makes at-least-once task-completion delivery safe to retry.
    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), EntityError> {
        if self.status == TaskStatus::Succeeded && self.result.as_ref() == Some(&result) {
            return Ok(());
        }
        self.guard(self.status == TaskStatus::Running, "complete")?;
        self.status = TaskStatus::Succeeded;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    /// Record failure; decides itself whether the task goes to `retrying`
    /// (attempts remain) or terminally `failed`
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), EntityError> {
        if self.status == TaskStatus::Failed {
            return Ok(());
        }
        self.guard(
            matches!(self.status, TaskStatus::Running | TaskStatus::Retrying),
            "fail",
        )?;
        self.error = Some(error.into());
        if self.config.retry_policy.should_retry(self.retry_count) {
            self.retry_count += 1;
            self.status = TaskStatus::Retrying;
            self.completed_at = None;
        } else {
            self.status = TaskStatus::Failed;
            self.completed_at = Some(Utc::now());
        }
        self.mark_updated();
        Ok(())
    }

    /// Whether policy and remaining attempts allow one more retry
    pub fn can_retry(&self) -> bool {
        self.status.can_retry() && self.config.retry_policy.should_retry(self.retry_count)
    }

    /// Revive a `failed`/`timeout` task straight back to `running`, as if
    /// the worker is starting a fresh attempt; advances `retry_count`
    pub fn retry(&mut self) -> Result<(), EntityError> {
        self.guard(self.status.is_retriable(), "retry")?;
        if !self.config.retry_policy.should_retry(self.retry_count) {
            return Err(EntityError::MaxRetryExceeded {
                max_retries: self.config.retry_policy.max_retries,
            });
        }
        self.retry_count += 1;
        self.status = TaskStatus::Running;
        self.error = None;
        self.completed_at = None;
        self.started_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    /// Delay to wait before the next retry attempt is requeued
    ///
    /// `retry_count` has already been incremented by `fail()` by the time the
    /// caller reaches for this, so the attempt index fed to the policy is
    /// `retry_count - 1`.
    pub fn next_retry_delay(&self) -> Duration {
        self.config
            .retry_policy
            .calculate_delay(self.retry_count.saturating_sub(1))
    }

    pub fn cancel(&mut self) -> Result<(), EntityError> {
        if self.status == TaskStatus::Cancelled {
            return Ok(());
        }
        self.guard(!self.status.is_terminal(), "cancel")?;
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    /// Skip without executing, e.g. because an upstream branch was not taken
    pub fn skip(&mut self, mock_result: Option<serde_json::Value>) -> Result<(), EntityError> {
        self.guard(self.status == TaskStatus::Pending, "skip")?;
        self.status = TaskStatus::Skipped;
        self.result = mock_result;
        self.completed_at = Some(Utc::now());
        self.mark_updated();
        Ok(())
    }

    /// Mark as having exceeded `config.timeout_seconds`
    pub fn timeout(&mut self) -> Result<(), EntityError> {
        self.guard(
            matches!(self.status, TaskStatus::Running | TaskStatus::Retrying),
            "timeout",
        )?;
        self.status = TaskStatus::Timeout;
        self.error = Some(format!(
            "exceeded timeout of {}s",
            self.config.timeout_seconds
        ));
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

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::Failed => "failed",
        TaskStatus::Retrying => "retrying",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::Skipped => "skipped",
        TaskStatus::Timeout => "timeout",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(max_retries: u32) -> TaskConfig {
        TaskConfig::new(
            TaskType::Http,
            30,
            Priority::Normal,
            RetryPolicy::fixed_delay(max_retries, Duration::from_millis(1)),
            None,
            1,
        )
        .unwrap()
    }

    fn task() -> Task {
        Task::new(Uuid::now_v7(), "fetch", config(2), json!({}), HashSet::new())
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let err = TaskConfig::new(
            TaskType::Http,
            0,
            Priority::Normal,
            RetryPolicy::no_retry(),
            None,
            1,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::NonPositiveTimeout);
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut t = task();
        t.queue().unwrap();
        assert_eq!(t.status, TaskStatus::Queued);
        t.start().unwrap();
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.started_at.is_some());
        t.complete(json!({"ok": true})).unwrap();
        assert_eq!(t.status, TaskStatus::Succeeded);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn duplicate_completion_with_same_result_converges() {
        let mut t = task();
        t.queue().unwrap();
        t.start().unwrap();
        t.complete(json!({"ok": true})).unwrap();
        let before = t.updated_at;
        t.complete(json!({"ok": true})).unwrap();
        assert_eq!(t.updated_at, before);
    }

    #[test]
    fn completion_with_different_result_after_success_is_rejected() {
        let mut t = task();
        t.queue().unwrap();
        t.start().unwrap();
        t.complete(json!({"ok": true})).unwrap();
        let err = t.complete(json!({"ok": false})).unwrap_err();
        assert!(matches!(err, EntityError::InvalidTransition { .. }));
    }

    #[test]
    fn retry_then_succeed() {
        let mut t = task();
        t.queue().unwrap();
        t.start().unwrap();
        t.fail("boom").unwrap();
        assert_eq!(t.status, TaskStatus::Retrying);
        assert_eq!(t.retry_count, 1);
        t.start().unwrap();
        t.complete(json!(null)).unwrap();
        assert_eq!(t.status, TaskStatus::Succeeded);
    }

    #[test]
    fn retry_exhausted_after_max_retries() {
        let mut t = Task::new(
            Uuid::now_v7(),
            "fetch",
            config(1),
            json!({}),
            HashSet::new(),
        );
        t.queue().unwrap();
        t.start().unwrap();
        t.fail("boom").unwrap();
        assert_eq!(t.status, TaskStatus::Retrying);
        t.start().unwrap();
        t.fail("boom again").unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert!(!t.can_retry());
        let err = t.retry().unwrap_err();
        assert!(matches!(err, EntityError::MaxRetryExceeded { max_retries: 1 }));
    }

    #[test]
    fn cancel_is_idempotent_and_terminal() {
        let mut t = task();
        t.cancel().unwrap();
        t.cancel().unwrap();
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert!(t.cancel().is_ok());
        assert!(t.start().is_err());
    }

    #[test]
    fn ready_to_execute_requires_all_dependencies_complete() {
        let dep = Uuid::now_v7();
        let mut deps = HashSet::new();
        deps.insert(dep);
        let t = Task::new(Uuid::now_v7(), "t", config(0), json!({}), deps);
        assert!(!t.is_ready_to_execute(&HashSet::new()));
        let mut completed = HashSet::new();
        completed.insert(dep);
        assert!(t.is_ready_to_execute(&completed));
    }

    #[test]
    fn timeout_transitions_from_running_or_retrying() {
        let mut t = task();
        assert!(t.timeout().is_err());
        t.queue().unwrap();
        t.start().unwrap();
        t.timeout().unwrap();
        assert_eq!(t.status, TaskStatus::Timeout);
        assert!(t.can_retry());

        let mut t = task();
        t.queue().unwrap();
        t.start().unwrap();
        t.fail("boom").unwrap();
        assert_eq!(t.status, TaskStatus::Retrying);
        t.timeout().unwrap();
        assert_eq!(t.status, TaskStatus::Timeout);
    }

    #[test]
    fn start_if_queued_is_a_no_op_once_running() {
        let mut t = task();
        t.queue().unwrap();
        t.start_if_queued();
        assert_eq!(t.status, TaskStatus::Running);
        let before = t.updated_at;
        t.start_if_queued();
        assert_eq!(t.updated_at, before);
    }

    #[test]
    fn subworkflow_and_human_are_not_schedulable() {
        assert!(!TaskType::Subworkflow.is_schedulable());
        assert!(!TaskType::Human.is_schedulable());
        assert!(TaskType::Http.is_schedulable());
    }
}
