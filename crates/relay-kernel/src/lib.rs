//! Relay kernel.
//!
//! Foundational concurrency primitives for the agent runtime:
//!
//! - **[`task_queue`]** -- bounded, priority-ordered task queue with FIFO
//!   tie-breaks, targeted removal and re-prioritization.
//! - **[`engine`]** -- bounded-concurrency execution engine with per-task
//!   timeout, pre/post hooks and cancellation.
//! - **[`bus`]** -- per-worker mailbox message bus with request/response
//!   correlation and broadcast fan-out.
//! - **[`error`]** -- unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod bus;
pub mod engine;
pub mod error;
pub mod task_queue;

pub use bus::{BusHandler, Message, MessageBus, MessageId, MessageKind};
pub use engine::{execute_batch, ExecutionEngine, ExecutionStats, ExecutionStatus, TaskResult};
pub use error::{KernelError, Result};
pub use task_queue::{EnqueueOutcome, QueueStats, Task, TaskId, TaskPriority, TaskQueue};
