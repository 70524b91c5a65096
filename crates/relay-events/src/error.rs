//! Event router error types.

/// Unified error type for event submission, dispatch, and result caching.
#[derive(Debug, thiserror::Error)]
pub enum EventsError {
    /// A priority lane rejected a submission because it is at capacity.
    #[error("event queue for priority {priority:?} is full (capacity {capacity})")]
    QueueFull { priority: crate::model::EventPriority, capacity: usize },

    /// No handler is registered for the event's kind.
    #[error("no handler registered for event kind '{kind}'")]
    HandlerNotFound { kind: String },

    /// Catch-all for unexpected internal errors. Prefer a typed variant
    /// whenever possible.
    #[error("internal event router error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the event router crate.
pub type Result<T> = std::result::Result<T, EventsError>;
