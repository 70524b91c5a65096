//! Conflict engine error types.

use uuid::Uuid;

/// Unified error type for the conflict engine (detection, resolution
/// planning, and execution against a calendar collaborator).
#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    /// A meeting referenced by id was not present in the analyzed set.
    #[error("meeting not found: {meeting_id}")]
    MeetingNotFound { meeting_id: Uuid },

    /// A conflict had no applicable resolution strategy to score.
    #[error("no resolution strategy available for conflict {conflict_id}")]
    NoStrategyAvailable { conflict_id: String },

    /// The calendar collaborator rejected or failed to execute an action.
    #[error("calendar action failed: {reason}")]
    CollaboratorFailure { reason: String },

    /// Catch-all for unexpected internal errors. Prefer a typed variant
    /// whenever possible.
    #[error("internal conflict engine error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the conflict engine crate.
pub type Result<T> = std::result::Result<T, ConflictError>;
