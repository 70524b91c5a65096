//! Calendar conflict detection and resolution planning.
//!
//! This crate is self-contained: it knows how to find scheduling conflicts
//! in a set of [`Meeting`]s and how to turn a [`Conflict`] into a scored
//! [`ResolutionPlan`]. Executing that plan against a real calendar is the
//! caller's job, through the [`CalendarCollaborator`] seam.

pub mod detect;
pub mod error;
pub mod model;
pub mod resolve;

pub use detect::{detect_conflicts, DetectionConfig, FocusBlock};
pub use error::{ConflictError, Result};
pub use model::{
    Action, ActionOutcome, AiDecision, AlternativeSlot, Conflict, ConflictSeverity, ConflictType,
    ExecutionReport, Meeting, MeetingStatus, ResolutionPlan, ResolutionStrategy,
};
pub use resolve::{create_resolution_plan, execute_resolution, CalendarCollaborator};
