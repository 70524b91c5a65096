//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`]. Each variant
//! carries enough context for callers to decide how to handle the failure.

use relay_kernel::{KernelError, TaskId};

/// Unified error type for the agent runtime (workers, orchestrator, proactive
/// scheduling).
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// No registered worker is capable of handling the task's kind.
    #[error("no capable worker registered for task kind: {kind}")]
    NoCapableWorker { kind: String },

    /// A task's declared dependencies never became satisfied.
    #[error("dependency unsatisfied for task {task_id}: missing {missing}")]
    DependencyUnsatisfied { task_id: TaskId, missing: String },

    /// A worker raised an error while executing a task.
    #[error("worker `{worker}` failed task {task_id}: {reason}")]
    WorkerFailed {
        worker: String,
        task_id: TaskId,
        reason: String,
    },

    /// The task exhausted its retry budget.
    #[error("task {task_id} exhausted retry budget ({attempts} attempts)")]
    RetriesExhausted { task_id: TaskId, attempts: u32 },

    /// A cron expression for a proactive job failed to parse.
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    /// Configuration loading or validation failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error propagated from the kernel crate (task queue, engine, bus).
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// An error propagated from the store crate.
    #[error("store error: {0}")]
    Store(#[from] relay_store::StoreError),

    /// Catch-all for unexpected internal errors. Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;
