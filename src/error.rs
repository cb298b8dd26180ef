//! Error taxonomy for the orchestrator core
//!
//! A narrow error type per layer (entity, store, queue, use case), composed
//! at the boundary that needs all of them.

use uuid::Uuid;

/// Errors raised by entity state-machine guards (Task/Workflow)
///
/// These are raised both for caller-initiated forbidden transitions (a
/// program error that should surface to the user) and for guard violations
/// the orchestrator encounters while processing duplicate/late events (which
/// it treats as convergence, not as an error — see `OrchestratorError`).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EntityError {
    /// A transition was attempted from a status that does not allow it
    #[error("cannot {operation} in {state} state")]
    InvalidTransition {
        operation: &'static str,
        state: &'static str,
    },

    /// `retry()` was called with no attempts remaining
    #[error("max retries ({max_retries}) exceeded")]
    MaxRetryExceeded { max_retries: u32 },

    /// `addTask` would introduce a cycle in the dependency graph
    #[error("adding task {task} would create a circular dependency")]
    CircularDependency { task: String },

    /// A task's `dependencies` set references a task id not present in the workflow
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: Uuid },

    /// Adding a task would exceed `MAX_TASKS_PER_WORKFLOW`
    #[error("workflow already has the maximum of {max} tasks")]
    TooManyTasks { max: usize },

    /// The `parentWorkflowId` chain exceeds `MAX_WORKFLOW_DEPTH`
    #[error("workflow nesting depth {depth} exceeds maximum of {max}")]
    MaxDepthExceeded { depth: u32, max: u32 },

    /// Topology (`addTask`/`removeTask`) was mutated outside of `draft`
    #[error("workflow topology is immutable once status leaves draft")]
    TopologyFrozen,
}

/// Errors raised when constructing or validating value objects / specs
///
/// Surfaced as 400-class to a caller; never retried by the core.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("max_retries must be >= 0")]
    NegativeMaxRetries,

    #[error("initial_delay must be >= 0")]
    NegativeInitialDelay,

    #[error("max_delay ({max_delay:?}) must be >= initial_delay ({initial_delay:?})")]
    MaxDelayBelowInitial {
        max_delay: std::time::Duration,
        initial_delay: std::time::Duration,
    },

    #[error("backoff_base must be >= 1")]
    BackoffBaseBelowOne,

    #[error("timeout_seconds must be > 0")]
    NonPositiveTimeout,

    #[error("max_parallel_instances must be >= 1")]
    NonPositiveParallelism,

    #[error("workflow must have at least one task before it can start")]
    EmptyWorkflow,

    #[error("task type {task_type:?} is not supported yet (reserved, see open questions)")]
    UnsupportedTaskType { task_type: String },

    #[error("dependency index {index} out of range for a workflow spec with {task_count} tasks")]
    DependencyIndexOutOfRange { index: usize, task_count: usize },

    #[error("unknown retry strategy {0:?}")]
    UnknownRetryStrategy(String),

    #[error("unknown execution mode {0:?}")]
    UnknownExecutionMode(String),

    #[error("unknown priority {0:?}")]
    UnknownPriority(String),
}

/// Errors raised by repository implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the work queue integration
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// The orchestrator's top-level error, composing the layers above plus
/// not-found — this is the type a caller atop this crate maps onto the
/// `{error, message, correlationId}` envelope from the error-handling design.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("entity {kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid state transition: {0}")]
    Entity(#[from] EntityError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl OrchestratorError {
    /// Machine-readable error code, the `code` field of the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Entity(_) => "INVALID_STATE",
            Self::Store(_) => "STORE_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
        }
    }
}
