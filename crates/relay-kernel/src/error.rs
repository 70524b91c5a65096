//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate. Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

use crate::bus::MessageId;
use crate::task_queue::TaskId;

/// Unified error type for the relay kernel (task queue, execution engine,
/// message bus).
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Task queue errors ---------------------------------------------------
    /// The queue is at capacity; the task was not admitted.
    #[error("task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The referenced task does not exist in the queue.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    // -- Execution engine errors ---------------------------------------------
    /// No in-flight execution matches the given task id.
    #[error("no running execution for task: {task_id}")]
    NotRunning { task_id: TaskId },

    /// A worker invocation exceeded its configured timeout.
    #[error("worker execution timed out after {elapsed_ms}ms")]
    WorkerTimeout { elapsed_ms: u128 },

    /// A worker invocation returned an error.
    #[error("worker execution failed: {reason}")]
    WorkerExecutionFailure { reason: String },

    /// `wait_for_capacity` exceeded its 60-second ceiling.
    #[error("timed out waiting for execution capacity")]
    CapacityWaitTimeout,

    // -- Message bus errors ---------------------------------------------------
    /// No worker is registered under the given id.
    #[error("worker not registered: {worker_id}")]
    WorkerNotRegistered { worker_id: String },

    /// A request expecting a response did not receive one within the
    /// configured timeout window.
    #[error("message response timed out: {message_id}")]
    MessageTimeout { message_id: MessageId },

    /// A response arrived whose `correlation_id` does not match any pending
    /// request. Not fatal -- the response is simply dropped.
    #[error("response correlates to unknown request: {correlation_id}")]
    CorrelationUnknown { correlation_id: MessageId },

    // -- Lifecycle ------------------------------------------------------------
    /// The component has been shut down and will not accept new work.
    #[error("kernel component is shut down")]
    Shutdown,

    // -- Generic ---------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant. Prefer a typed variant whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
