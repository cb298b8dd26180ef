//! Status value objects
//!
//! `TaskStatus` and `WorkflowStatus` are frozen enums with predicates
//! partitioning them into the sets the rest of the crate reasons about
//! (waiting/active/terminal/...). They carry no data beyond the
//! discriminant — `Task`/`Workflow` own the timestamps and messages
//! associated with a transition.

use serde::{Deserialize, Serialize};

/// Execution status of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task created, waiting to be picked up
    Pending,
    /// Task added to the work queue
    Queued,
    /// Currently executing
    Running,
    /// Completed successfully
    Succeeded,
    /// Failed after all retries
    Failed,
    /// Failed, will retry
    Retrying,
    /// Manually cancelled
    Cancelled,
    /// Skipped (conditional execution)
    Skipped,
    /// Exceeded its timeout
    Timeout,
}

impl TaskStatus {
    /// Waiting: created but not yet executing
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }

    /// Active: currently occupying a worker slot
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Retrying)
    }

    /// Terminal: no further transitions are allowed
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }

    /// Retriable: a terminal-looking status that `retry()` can revive
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }

    pub fn can_retry(self) -> bool {
        self.is_retriable()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Execution status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not started; topology may still be edited
    Draft,
    /// Waiting to start
    Pending,
    /// Currently executing
    Running,
    /// Temporarily paused by the user
    Paused,
    /// All tasks completed successfully
    Succeeded,
    /// One or more tasks failed terminally
    Failed,
    /// Manually cancelled
    Cancelled,
    /// Running Saga compensation (rollback)
    Compensating,
    /// Compensation completed
    Compensated,
}

impl WorkflowStatus {
    /// Active: currently making forward (or compensating) progress
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Compensating)
    }

    /// Terminal: no further transitions are allowed
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Compensated
        )
    }

    pub fn can_pause(self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn can_resume(self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn can_cancel(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Paused)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_partitions_are_disjoint_and_exhaustive() {
        let all = [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Retrying,
            TaskStatus::Cancelled,
            TaskStatus::Skipped,
            TaskStatus::Timeout,
        ];
        for s in all {
            let buckets = [s.is_waiting(), s.is_active(), s.is_terminal()];
            let in_buckets = buckets.iter().filter(|b| **b).count();
            // Timeout is neither waiting, active, nor terminal by itself -
            // it's a transient status the orchestrator moves out of immediately.
            if s == TaskStatus::Timeout {
                assert_eq!(in_buckets, 0, "{s} unexpectedly classified");
            } else {
                assert_eq!(in_buckets, 1, "{s} should be in exactly one bucket");
            }
        }
    }

    #[test]
    fn retriable_statuses() {
        assert!(TaskStatus::Failed.can_retry());
        assert!(TaskStatus::Timeout.can_retry());
        assert!(!TaskStatus::Succeeded.can_retry());
        assert!(!TaskStatus::Pending.can_retry());
    }

    #[test]
    fn workflow_status_predicates() {
        assert!(WorkflowStatus::Running.can_pause());
        assert!(!WorkflowStatus::Draft.can_pause());
        assert!(WorkflowStatus::Paused.can_resume());
        assert!(WorkflowStatus::Pending.can_cancel());
        assert!(WorkflowStatus::Running.can_cancel());
        assert!(WorkflowStatus::Paused.can_cancel());
        assert!(!WorkflowStatus::Draft.can_cancel());
        assert!(WorkflowStatus::Succeeded.is_terminal());
        assert!(WorkflowStatus::Compensated.is_terminal());
        assert!(!WorkflowStatus::Compensating.is_terminal());
        assert!(WorkflowStatus::Compensating.is_active());
    }

    #[test]
    fn display_matches_wire_format() {
        assert_eq!(TaskStatus::Retrying.to_string(), "retrying");
        assert_eq!(WorkflowStatus::Compensated.to_string(), "compensated");
    }

    #[test]
    fn serde_round_trip() {
        let s = TaskStatus::Timeout;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"timeout\"");
        let back: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
