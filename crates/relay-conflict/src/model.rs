//! Calendar data model: meetings, conflicts, and resolution plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Scheduled,
    Cancelled,
    Completed,
}

/// An AI-made (or AI-recommended) decision about a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiDecision {
    Accept,
    Decline,
    Reschedule,
    Delegate,
    DelegateToAi,
    RequestInfo,
}

/// A scheduled event on a calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// IANA timezone name, e.g. `"America/New_York"`.
    pub timezone: String,
    pub attendees: Vec<String>,
    pub organizer: String,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub status: MeetingStatus,
    pub ai_decision: Option<AiDecision>,
    pub decision_confidence: Option<f64>,
    pub decision_reasoning: Option<String>,
    /// Importance score in `[0, 1]`.
    pub importance: f64,
    /// Conflict score in `[0, 1]`.
    pub conflict_score: f64,
    /// Productivity impact in `[-1, 1]`.
    pub productivity_impact: f64,
}

impl Meeting {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn importance_or_default(&self) -> f64 {
        if self.importance.is_finite() && self.importance > 0.0 {
            self.importance
        } else {
            0.5
        }
    }
}

/// The nine conflict categories this engine detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    DirectOverlap,
    InsufficientBuffer,
    FocusTimeConflict,
    CommuteTimeConflict,
    OverloadedDay,
    DoubleBooking,
    PreparationTimeConflict,
    LunchConflict,
    TimezoneConflict,
}

/// Conflict severity. Ordered so `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A candidate remediation for a conflict. `SplitMeeting`, `DelegateMeeting`,
/// and `RequestClarification` are never selected by a detector today but are
/// kept in the enum -- the scorer considers them and a future detector may
/// route to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    AutoReschedule,
    SuggestAlternative,
    AutoDecline,
    CreateBuffer,
    SplitMeeting,
    DelegateMeeting,
    RequestClarification,
    OptimizeSchedule,
}

/// A detected scheduling problem spanning one or more meetings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub meetings: Vec<Uuid>,
    pub description: String,
    /// Impact score in `[0, 1]`.
    pub impact_score: f64,
    pub resolution_strategies: Vec<ResolutionStrategy>,
    pub metadata: serde_json::Value,
}

/// A proposed alternative time slot for a meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativeSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: String,
}

/// A single step of a resolution plan, dispatched to a [`crate::resolve::CalendarCollaborator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    RescheduleMeeting {
        meeting_id: Uuid,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        reason: String,
    },
    DeclineMeeting {
        meeting_id: Uuid,
        reason: String,
    },
    CreateBuffer {
        before_meeting_id: Uuid,
        buffer_minutes: i64,
    },
    SuggestAlternatives {
        meeting_id: Uuid,
        alternatives: Vec<AlternativeSlot>,
    },
    OptimizeSchedule {
        meeting_ids: Vec<Uuid>,
    },
}

/// A chosen strategy and concrete actions to resolve one [`Conflict`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    pub actions: Vec<Action>,
    /// Estimated probability the plan succeeds if executed, in `[0, 1]`.
    pub estimated_success_rate: f64,
    /// Estimated fraction of the conflict's impact this plan resolves, in `[0, 1]`.
    pub estimated_impact: f64,
    pub required_permissions: Vec<String>,
    pub user_approval_required: bool,
}

/// Outcome of dispatching a single [`Action`].
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: Action,
    pub success: bool,
    pub detail: Option<String>,
    pub error: Option<String>,
}

/// Aggregate result of executing a [`ResolutionPlan`].
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub conflict_id: String,
    /// `true` iff every action succeeded.
    pub success: bool,
    /// `true` iff at least one action succeeded (and not all did).
    pub partial_success: bool,
    pub executed: Vec<ActionOutcome>,
    pub failed: Vec<ActionOutcome>,
}
