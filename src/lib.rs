//! Distributed workflow orchestrator core
//!
//! A DAG-of-tasks state machine plus the service that schedules ready
//! tasks, reacts to completion/failure events, applies retry policies, and
//! detects terminal workflow conditions. Built to stay idempotent and
//! crash-safe under partial failure and duplicate event delivery - every
//! public mutation on [`task::Task`], [`workflow::Workflow`], and
//! [`orchestrator::WorkflowOrchestrator`] is written so that replaying the
//! same event twice converges instead of erroring.
//!
//! ```text
//!  CreateWorkflowUseCase --> WorkflowRepository / TaskRepository
//!                                        |
//!                                        v
//!                           WorkflowOrchestrator <--- on_task_completed/on_task_failed
//!                                        |                (from external workers)
//!                                        v
//!                                    WorkQueue ---> external worker pool (not in this crate)
//! ```
//!
//! Task execution itself, the HTTP/RPC surface, and the worker pool that
//! claims published messages are external collaborators - this crate
//! specifies their boundary (`repository`, `workqueue`) without implementing
//! them end to end.

pub mod create_workflow;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod repository;
pub mod retry;
pub mod status;
pub mod store;
pub mod task;
pub mod workflow;
pub mod workqueue;

/// Common imports for consumers of this crate
pub mod prelude {
    pub use crate::create_workflow::{CreateWorkflowUseCase, TaskSpec, WorkflowSpec};
    pub use crate::error::{EntityError, OrchestratorError, StoreError, ValidationError};
    pub use crate::orchestrator::{WorkflowOrchestrator, WorkflowSnapshot};
    pub use crate::recovery::{RecoveryConfig, RecoverySweeper};
    pub use crate::repository::{TaskRepository, WorkflowRepository};
    pub use crate::retry::{RetryPolicy, RetryStrategy};
    pub use crate::status::{TaskStatus, WorkflowStatus};
    pub use crate::store::{InMemoryStore, PostgresStore};
    pub use crate::task::{Priority, Task, TaskConfig, TaskType};
    pub use crate::workflow::{ExecutionMode, Workflow};
    pub use crate::workqueue::{InProcessWorkQueue, TaskReadyMessage, WorkQueue};
}
