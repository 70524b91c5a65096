//! Event and cached-result types for the real-time event router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority lane an event is routed into. Determines queue capacity and the
/// minimum delay the router enforces before dispatching the event to its
/// handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl EventPriority {
    /// Index of this priority's lane, also its `[SegQueue; 4]` slot.
    pub fn lane(self) -> usize {
        match self {
            EventPriority::Critical => 0,
            EventPriority::High => 1,
            EventPriority::Medium => 2,
            EventPriority::Low => 3,
        }
    }

    /// Maximum number of events this lane will hold before `submit` reports
    /// a full queue.
    pub fn capacity(self) -> usize {
        match self {
            EventPriority::Critical => 100,
            EventPriority::High => 500,
            EventPriority::Medium => 1000,
            EventPriority::Low => 2000,
        }
    }

    /// Minimum time an event must sit in this lane before its handler runs.
    pub fn min_delay(self) -> std::time::Duration {
        match self {
            EventPriority::Critical => std::time::Duration::ZERO,
            EventPriority::High => std::time::Duration::from_secs(1),
            EventPriority::Medium => std::time::Duration::from_secs(5),
            EventPriority::Low => std::time::Duration::from_secs(15),
        }
    }

    /// One priority class lower, floored at `Low`. Used for retry-with-demotion.
    pub fn demote(self) -> EventPriority {
        match self {
            EventPriority::Critical => EventPriority::High,
            EventPriority::High => EventPriority::Medium,
            EventPriority::Medium | EventPriority::Low => EventPriority::Low,
        }
    }
}

/// A discrete external occurrence ingested by the event router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Dispatch key: `new_item`, `updated_item`, `cancelled_item`,
    /// `user_feedback`, `optimization_trigger`, or any caller-defined tag.
    pub kind: String,
    pub priority: EventPriority,
    pub payload: Value,
    pub retry_count: u32,
    pub submitted_at: DateTime<Utc>,
}

impl Event {
    /// Builds a stable id from the event's kind, an opaque subject (e.g. a
    /// meeting or user id), and its submission time.
    pub fn make_id(kind: &str, subject: &str, submitted_at: DateTime<Utc>) -> String {
        format!("evt_{kind}_{subject}_{}", submitted_at.timestamp_nanos_opt().unwrap_or_default())
    }
}

/// Outcome of processing one [`Event`], kept in the result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEventResult {
    pub event_id: String,
    pub kind: String,
    pub success: bool,
    pub result: Option<Value>,
    pub processing_duration: std::time::Duration,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}
