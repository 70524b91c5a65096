//! Resolution planning and execution: turns a [`Conflict`] into a scored,
//! ordered [`ResolutionPlan`] and dispatches its actions through an external
//! calendar integration.

use async_trait::async_trait;

use crate::error::{ConflictError, Result};
use crate::model::{
    Action, ActionOutcome, AlternativeSlot, Conflict, ConflictSeverity, ConflictType,
    ExecutionReport, Meeting, ResolutionPlan, ResolutionStrategy,
};

/// The calendar-side integration a resolution plan is executed against.
/// The wire protocol (CalDAV, a vendor API, ...) is outside this crate;
/// callers provide an implementation that knows how to talk to it.
#[async_trait]
pub trait CalendarCollaborator: Send + Sync {
    async fn reschedule(&self, action: &Action) -> std::result::Result<String, String>;
    async fn decline(&self, action: &Action) -> std::result::Result<String, String>;
    async fn create_buffer(&self, action: &Action) -> std::result::Result<String, String>;
    async fn suggest_alternatives(&self, action: &Action) -> std::result::Result<String, String>;
    async fn optimize_schedule(&self, action: &Action) -> std::result::Result<String, String>;
}

fn severity_multiplier(severity: ConflictSeverity) -> f64 {
    match severity {
        ConflictSeverity::Low => 0.8,
        ConflictSeverity::Medium => 1.0,
        ConflictSeverity::High => 1.2,
        ConflictSeverity::Critical => 1.5,
    }
}

fn score_strategy(strategy: ResolutionStrategy, conflict: &Conflict, avg_importance: f64) -> f64 {
    let mut score = 0.5;
    match strategy {
        ResolutionStrategy::AutoReschedule => score += avg_importance * 0.3,
        ResolutionStrategy::AutoDecline => score += (1.0 - avg_importance) * 0.4,
        ResolutionStrategy::CreateBuffer if conflict.conflict_type == ConflictType::InsufficientBuffer => score += 0.3,
        ResolutionStrategy::OptimizeSchedule if conflict.conflict_type == ConflictType::OverloadedDay => score += 0.4,
        _ => {}
    }
    (score * severity_multiplier(conflict.severity)).min(1.0)
}

fn select_best_strategy(conflict: &Conflict, avg_importance: f64) -> Option<ResolutionStrategy> {
    conflict
        .resolution_strategies
        .iter()
        .copied()
        .max_by(|a, b| {
            score_strategy(*a, conflict, avg_importance)
                .partial_cmp(&score_strategy(*b, conflict, avg_importance))
                .unwrap()
        })
}

fn estimate_success_rate(strategy: ResolutionStrategy, severity: ConflictSeverity) -> f64 {
    let base = match strategy {
        ResolutionStrategy::AutoReschedule => 0.8,
        ResolutionStrategy::AutoDecline => 0.9,
        ResolutionStrategy::CreateBuffer => 0.95,
        ResolutionStrategy::SuggestAlternative => 0.7,
        ResolutionStrategy::OptimizeSchedule => 0.6,
        _ => 0.5,
    };
    let adjusted = match severity {
        ConflictSeverity::Critical => base * 0.8,
        ConflictSeverity::Low => base * 1.1,
        _ => base,
    };
    adjusted.min(1.0)
}

fn required_permissions(strategy: ResolutionStrategy) -> Vec<String> {
    match strategy {
        ResolutionStrategy::AutoReschedule
        | ResolutionStrategy::AutoDecline
        | ResolutionStrategy::CreateBuffer
        | ResolutionStrategy::OptimizeSchedule => vec!["calendar.events.write".to_string()],
        _ => Vec::new(),
    }
}

fn requires_user_approval(strategy: ResolutionStrategy, severity: ConflictSeverity) -> bool {
    matches!(strategy, ResolutionStrategy::AutoDecline | ResolutionStrategy::AutoReschedule)
        && matches!(severity, ConflictSeverity::High | ConflictSeverity::Critical)
}

fn least_important<'a>(meetings: &'a [&'a Meeting]) -> &'a Meeting {
    meetings.iter().min_by(|a, b| a.importance_or_default().partial_cmp(&b.importance_or_default()).unwrap()).unwrap()
}

fn buffer_deficit(conflict: &Conflict) -> i64 {
    conflict.metadata.get("buffer_deficit").and_then(|v| v.as_i64()).unwrap_or(15)
}

fn generate_actions(strategy: ResolutionStrategy, conflict: &Conflict, meetings: &[&Meeting]) -> Vec<Action> {
    match strategy {
        ResolutionStrategy::AutoReschedule => meetings
            .iter()
            .filter(|m| m.importance_or_default() < 0.7)
            .map(|m| Action::RescheduleMeeting {
                meeting_id: m.id,
                new_start: m.start_time + chrono::Duration::hours(1),
                new_end: m.end_time + chrono::Duration::hours(1),
                reason: conflict.description.clone(),
            })
            .collect(),
        ResolutionStrategy::AutoDecline => {
            let target = least_important(meetings);
            vec![Action::DeclineMeeting { meeting_id: target.id, reason: conflict.description.clone() }]
        }
        ResolutionStrategy::CreateBuffer => meetings
            .first()
            .map(|m| Action::CreateBuffer { before_meeting_id: m.id, buffer_minutes: buffer_deficit(conflict) })
            .into_iter()
            .collect(),
        ResolutionStrategy::SuggestAlternative => meetings
            .iter()
            .map(|m| Action::SuggestAlternatives {
                meeting_id: m.id,
                alternatives: vec![
                    AlternativeSlot {
                        start_time: m.start_time + chrono::Duration::hours(1),
                        end_time: m.end_time + chrono::Duration::hours(1),
                        reason: "next available slot same day".to_string(),
                    },
                    AlternativeSlot {
                        start_time: m.start_time + chrono::Duration::days(1),
                        end_time: m.end_time + chrono::Duration::days(1),
                        reason: "same time next day".to_string(),
                    },
                ],
            })
            .collect(),
        ResolutionStrategy::OptimizeSchedule => {
            vec![Action::OptimizeSchedule { meeting_ids: meetings.iter().map(|m| m.id).collect() }]
        }
        ResolutionStrategy::SplitMeeting | ResolutionStrategy::DelegateMeeting | ResolutionStrategy::RequestClarification => Vec::new(),
    }
}

fn estimate_resolution_impact(conflict: &Conflict) -> f64 {
    (conflict.impact_score * 0.9).clamp(0.0, 1.0)
}

/// Builds a scored, executable [`ResolutionPlan`] for `conflict`.
///
/// `meetings` must include every meeting referenced by `conflict.meetings`;
/// returns [`ConflictError::MeetingNotFound`] otherwise.
pub fn create_resolution_plan(conflict: &Conflict, meetings: &[Meeting]) -> Result<ResolutionPlan> {
    let involved: Vec<&Meeting> = conflict
        .meetings
        .iter()
        .map(|id| meetings.iter().find(|m| &m.id == id).ok_or(ConflictError::MeetingNotFound { meeting_id: *id }))
        .collect::<std::result::Result<_, _>>()?;

    let avg_importance = involved.iter().map(|m| m.importance_or_default()).sum::<f64>() / involved.len().max(1) as f64;

    let strategy = select_best_strategy(conflict, avg_importance)
        .ok_or_else(|| ConflictError::NoStrategyAvailable { conflict_id: conflict.id.clone() })?;

    Ok(ResolutionPlan {
        conflict_id: conflict.id.clone(),
        strategy,
        actions: generate_actions(strategy, conflict, &involved),
        estimated_success_rate: estimate_success_rate(strategy, conflict.severity),
        estimated_impact: estimate_resolution_impact(conflict),
        required_permissions: required_permissions(strategy),
        user_approval_required: requires_user_approval(strategy, conflict.severity),
    })
}

async fn execute_action(action: &Action, collaborator: &dyn CalendarCollaborator) -> ActionOutcome {
    let outcome = match action {
        Action::RescheduleMeeting { .. } => collaborator.reschedule(action).await,
        Action::DeclineMeeting { .. } => collaborator.decline(action).await,
        Action::CreateBuffer { .. } => collaborator.create_buffer(action).await,
        Action::SuggestAlternatives { .. } => collaborator.suggest_alternatives(action).await,
        Action::OptimizeSchedule { .. } => collaborator.optimize_schedule(action).await,
    };
    match outcome {
        Ok(detail) => ActionOutcome { action: action.clone(), success: true, detail: Some(detail), error: None },
        Err(error) => ActionOutcome { action: action.clone(), success: false, detail: None, error: Some(error) },
    }
}

/// Dispatches every action in `plan` through `collaborator`, sequentially
/// (later actions may depend on the calendar state left by earlier ones).
pub async fn execute_resolution(plan: &ResolutionPlan, collaborator: &dyn CalendarCollaborator) -> ExecutionReport {
    let mut executed = Vec::new();
    let mut failed = Vec::new();
    for action in &plan.actions {
        let outcome = execute_action(action, collaborator).await;
        if outcome.success {
            executed.push(outcome);
        } else {
            failed.push(outcome);
        }
    }
    ExecutionReport {
        conflict_id: plan.conflict_id.clone(),
        success: failed.is_empty() && !executed.is_empty(),
        partial_success: !executed.is_empty() && !failed.is_empty(),
        executed,
        failed,
    }
}
