//! Conflict detection: nine independent passes over a meeting set.
//!
//! Each pass is blind to the others; `detect_conflicts` runs them in a fixed
//! order and returns the union, sorted by severity (descending) then impact
//! score (descending).
//!
//! None of these heuristics do real IANA timezone conversion -- there is no
//! timezone database dependency in this crate, so `start_time`'s hour is
//! treated directly as the meeting's local wall-clock hour. This is a
//! deliberate simplification, not a bug: the conflict_score/impact_score the
//! caller ultimately cares about are heuristic estimates already.

use std::collections::HashMap;

use chrono::Timelike;

use crate::model::{Conflict, ConflictSeverity, ConflictType, Meeting, ResolutionStrategy};

/// A recurring block of the day reserved for uninterrupted focus work.
#[derive(Debug, Clone, Copy)]
pub struct FocusBlock {
    pub start_hour: u32,
    pub end_hour: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub focus_blocks: Vec<FocusBlock>,
    pub overloaded_day_meeting_count: usize,
    pub overloaded_day_hours: f64,
    pub overloaded_day_severity_multiplier: f64,
    pub prep_keywords: Vec<String>,
    pub prep_window_minutes: i64,
    pub same_building_travel_minutes: i64,
    pub cross_location_travel_minutes: i64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            focus_blocks: vec![
                FocusBlock { start_hour: 9, end_hour: 11 },
                FocusBlock { start_hour: 14, end_hour: 16 },
            ],
            overloaded_day_meeting_count: 6,
            overloaded_day_hours: 8.0,
            overloaded_day_severity_multiplier: 1.2,
            prep_keywords: vec![
                "presentation".into(),
                "demo".into(),
                "pitch".into(),
                "interview".into(),
                "review".into(),
            ],
            prep_window_minutes: 30,
            same_building_travel_minutes: 10,
            cross_location_travel_minutes: 30,
        }
    }
}

fn overlap_minutes(a: &Meeting, b: &Meeting) -> i64 {
    let start = a.start_time.max(b.start_time);
    let end = a.end_time.min(b.end_time);
    (end - start).num_minutes()
}

fn gap_minutes(a: &Meeting, b: &Meeting) -> i64 {
    let (earlier, later) = if a.start_time <= b.start_time { (a, b) } else { (b, a) };
    (later.start_time - earlier.end_time).num_minutes()
}

fn avg_importance(meetings: &[&Meeting]) -> f64 {
    let sum: f64 = meetings.iter().map(|m| m.importance_or_default()).sum();
    sum / meetings.len() as f64
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn conflict_id(conflict_type: ConflictType, meetings: &[&Meeting]) -> String {
    let suffix: String = meetings.iter().map(|m| m.id.simple().to_string()[..8].to_string()).collect::<Vec<_>>().join("-");
    format!("{:?}-{}", conflict_type, suffix).to_lowercase()
}

/// Meetings whose start time exactly coincides are double-bookings, not
/// plain overlaps; this detector excludes those pairs so they're reported
/// once by [`detect_double_bookings`] instead.
pub fn detect_direct_overlaps(meetings: &[Meeting]) -> Vec<Conflict> {
    let mut out = Vec::new();
    for i in 0..meetings.len() {
        for j in (i + 1)..meetings.len() {
            let (a, b) = (&meetings[i], &meetings[j]);
            if a.start_time == b.start_time {
                continue;
            }
            let overlap = overlap_minutes(a, b);
            if overlap <= 0 {
                continue;
            }
            let severity = if overlap >= 60 {
                ConflictSeverity::Critical
            } else if overlap >= 30 {
                ConflictSeverity::High
            } else if overlap >= 15 {
                ConflictSeverity::Medium
            } else {
                ConflictSeverity::Low
            };
            out.push(Conflict {
                id: conflict_id(ConflictType::DirectOverlap, &[a, b]),
                conflict_type: ConflictType::DirectOverlap,
                severity,
                meetings: vec![a.id, b.id],
                description: format!("\"{}\" overlaps \"{}\" by {overlap} minutes", a.title, b.title),
                impact_score: clamp01(avg_importance(&[a, b])),
                resolution_strategies: vec![
                    ResolutionStrategy::AutoReschedule,
                    ResolutionStrategy::SuggestAlternative,
                    ResolutionStrategy::AutoDecline,
                ],
                metadata: serde_json::json!({"overlap_minutes": overlap}),
            });
        }
    }
    out
}

/// Meetings that start at the exact same instant: a stricter subset of
/// direct overlap that always warrants the strongest resolution strategies.
pub fn detect_double_bookings(meetings: &[Meeting]) -> Vec<Conflict> {
    let mut out = Vec::new();
    for i in 0..meetings.len() {
        for j in (i + 1)..meetings.len() {
            let (a, b) = (&meetings[i], &meetings[j]);
            if a.start_time != b.start_time {
                continue;
            }
            out.push(Conflict {
                id: conflict_id(ConflictType::DoubleBooking, &[a, b]),
                conflict_type: ConflictType::DoubleBooking,
                severity: ConflictSeverity::Critical,
                meetings: vec![a.id, b.id],
                description: format!("\"{}\" and \"{}\" are booked at the identical start time", a.title, b.title),
                impact_score: clamp01(avg_importance(&[a, b]).max(0.6)),
                resolution_strategies: vec![
                    ResolutionStrategy::AutoDecline,
                    ResolutionStrategy::AutoReschedule,
                    ResolutionStrategy::SuggestAlternative,
                ],
                metadata: serde_json::Value::Null,
            });
        }
    }
    out
}

/// Adjacent meetings with a gap too small to context-switch between, but
/// not actually overlapping.
pub fn detect_insufficient_buffers(meetings: &[Meeting]) -> Vec<Conflict> {
    let mut out = Vec::new();
    for i in 0..meetings.len() {
        for j in (i + 1)..meetings.len() {
            let (a, b) = (&meetings[i], &meetings[j]);
            let gap = gap_minutes(a, b);
            if !(0 < gap && gap < 15) {
                continue;
            }
            let severity = if gap <= 5 {
                ConflictSeverity::High
            } else if gap <= 10 {
                ConflictSeverity::Medium
            } else {
                ConflictSeverity::Low
            };
            out.push(Conflict {
                id: conflict_id(ConflictType::InsufficientBuffer, &[a, b]),
                conflict_type: ConflictType::InsufficientBuffer,
                severity,
                meetings: vec![a.id, b.id],
                description: format!("only {gap} minutes between \"{}\" and \"{}\"", a.title, b.title),
                impact_score: clamp01(avg_importance(&[a, b]) * 0.7),
                resolution_strategies: vec![ResolutionStrategy::CreateBuffer, ResolutionStrategy::AutoReschedule],
                metadata: serde_json::json!({"gap_minutes": gap, "buffer_deficit": 15 - gap}),
            });
        }
    }
    out
}

/// A low-importance meeting scheduled inside a configured focus block.
pub fn detect_focus_time_conflicts(meetings: &[Meeting], config: &DetectionConfig) -> Vec<Conflict> {
    let mut out = Vec::new();
    for m in meetings {
        if m.importance_or_default() >= 0.7 {
            continue;
        }
        let hour = m.start_time.hour();
        let in_block = config.focus_blocks.iter().any(|b| hour >= b.start_hour && hour < b.end_hour);
        if !in_block {
            continue;
        }
        let severity = if m.importance_or_default() < 0.3 { ConflictSeverity::Medium } else { ConflictSeverity::Low };
        out.push(Conflict {
            id: conflict_id(ConflictType::FocusTimeConflict, &[m]),
            conflict_type: ConflictType::FocusTimeConflict,
            severity,
            meetings: vec![m.id],
            description: format!("\"{}\" sits inside a protected focus block", m.title),
            impact_score: clamp01(1.0 - m.importance_or_default()),
            resolution_strategies: vec![ResolutionStrategy::AutoReschedule, ResolutionStrategy::SuggestAlternative],
            metadata: serde_json::Value::Null,
        });
    }
    out
}

/// A day with either too many meetings or too many scheduled hours.
pub fn detect_overloaded_days(meetings: &[Meeting], config: &DetectionConfig) -> Vec<Conflict> {
    let mut by_day: HashMap<chrono::NaiveDate, Vec<&Meeting>> = HashMap::new();
    for m in meetings {
        by_day.entry(m.start_time.date_naive()).or_default().push(m);
    }
    let mut out = Vec::new();
    for (day, day_meetings) in by_day {
        let count = day_meetings.len();
        let hours: f64 = day_meetings.iter().map(|m| m.duration_minutes() as f64 / 60.0).sum();
        if count <= config.overloaded_day_meeting_count && hours <= config.overloaded_day_hours {
            continue;
        }
        let severity = if count > config.overloaded_day_meeting_count + 2 || hours > config.overloaded_day_hours + 2.0 {
            ConflictSeverity::High
        } else {
            ConflictSeverity::Medium
        };
        out.push(Conflict {
            id: format!("overloaded_day-{day}"),
            conflict_type: ConflictType::OverloadedDay,
            severity,
            meetings: day_meetings.iter().map(|m| m.id).collect(),
            description: format!("{day} has {count} meetings totaling {hours:.1} hours"),
            impact_score: clamp01(
                (count as f64 / config.overloaded_day_meeting_count as f64)
                    * config.overloaded_day_severity_multiplier,
            ),
            resolution_strategies: vec![ResolutionStrategy::OptimizeSchedule, ResolutionStrategy::SuggestAlternative],
            metadata: serde_json::json!({"meeting_count": count, "total_hours": hours}),
        });
    }
    out
}

fn title_needs_prep(title: &str, config: &DetectionConfig) -> bool {
    let lower = title.to_lowercase();
    config.prep_keywords.iter().any(|kw| lower.contains(kw.as_str()))
}

/// A presentation/demo/pitch/interview/review with too little runway after
/// the previous meeting.
pub fn detect_preparation_time_conflicts(meetings: &[Meeting], config: &DetectionConfig) -> Vec<Conflict> {
    let mut out = Vec::new();
    for i in 0..meetings.len() {
        let m = &meetings[i];
        if !title_needs_prep(&m.title, config) {
            continue;
        }
        let prior = meetings[..i]
            .iter()
            .filter(|p| p.end_time <= m.start_time)
            .max_by_key(|p| p.end_time);
        let Some(prior) = prior else { continue };
        let available = (m.start_time - prior.end_time).num_minutes();
        if available >= config.prep_window_minutes {
            continue;
        }
        out.push(Conflict {
            id: conflict_id(ConflictType::PreparationTimeConflict, &[m]),
            conflict_type: ConflictType::PreparationTimeConflict,
            severity: ConflictSeverity::Medium,
            meetings: vec![prior.id, m.id],
            description: format!("only {available} minutes to prepare for \"{}\"", m.title),
            impact_score: clamp01(m.importance_or_default()),
            resolution_strategies: vec![ResolutionStrategy::AutoReschedule, ResolutionStrategy::CreateBuffer],
            metadata: serde_json::json!({"available_minutes": available}),
        });
    }
    out
}

enum LocationKind {
    Virtual,
    Physical(String),
    Unknown,
}

fn normalize_location(location: &Option<String>) -> LocationKind {
    match location {
        None => LocationKind::Unknown,
        Some(loc) => {
            let lower = loc.to_lowercase();
            if lower.is_empty() {
                LocationKind::Unknown
            } else if lower.contains("zoom") || lower.contains("meet.") || lower.contains("teams") || lower.contains("http") {
                LocationKind::Virtual
            } else {
                LocationKind::Physical(lower.trim().to_string())
            }
        }
    }
}

fn travel_minutes(a: &Option<String>, b: &Option<String>, config: &DetectionConfig) -> Option<i64> {
    match (normalize_location(a), normalize_location(b)) {
        (LocationKind::Virtual, LocationKind::Virtual) => Some(0),
        (LocationKind::Unknown, _) | (_, LocationKind::Unknown) => None,
        (LocationKind::Virtual, LocationKind::Physical(_)) | (LocationKind::Physical(_), LocationKind::Virtual) => {
            Some(config.cross_location_travel_minutes)
        }
        (LocationKind::Physical(x), LocationKind::Physical(y)) if x == y => Some(config.same_building_travel_minutes),
        (LocationKind::Physical(_), LocationKind::Physical(_)) => Some(config.cross_location_travel_minutes),
    }
}

/// Back-to-back meetings at different locations with too little travel time.
pub fn detect_commute_conflicts(meetings: &[Meeting], config: &DetectionConfig) -> Vec<Conflict> {
    let mut out = Vec::new();
    for pair in meetings.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let Some(needed) = travel_minutes(&a.location, &b.location, config) else { continue };
        if needed == 0 {
            continue;
        }
        let gap = gap_minutes(a, b);
        if gap >= needed {
            continue;
        }
        out.push(Conflict {
            id: conflict_id(ConflictType::CommuteTimeConflict, &[a, b]),
            conflict_type: ConflictType::CommuteTimeConflict,
            severity: if gap <= 0 { ConflictSeverity::High } else { ConflictSeverity::Medium },
            meetings: vec![a.id, b.id],
            description: format!("{needed} minutes of travel needed between \"{}\" and \"{}\", only {gap} available", a.title, b.title),
            impact_score: clamp01(avg_importance(&[a, b])),
            resolution_strategies: vec![ResolutionStrategy::AutoReschedule, ResolutionStrategy::CreateBuffer],
            metadata: serde_json::json!({"gap_minutes": gap, "travel_minutes_needed": needed}),
        });
    }
    out
}

/// A non-lunch meeting that overlaps the midday lunch window.
pub fn detect_lunch_conflicts(meetings: &[Meeting]) -> Vec<Conflict> {
    let mut out = Vec::new();
    for m in meetings {
        if m.title.to_lowercase().contains("lunch") {
            continue;
        }
        let day = m.start_time.date_naive();
        let lunch_start = day.and_hms_opt(12, 0, 0).unwrap().and_utc();
        let lunch_end = day.and_hms_opt(13, 0, 0).unwrap().and_utc();
        if !(m.start_time < lunch_end && m.end_time > lunch_start) {
            continue;
        }
        out.push(Conflict {
            id: conflict_id(ConflictType::LunchConflict, &[m]),
            conflict_type: ConflictType::LunchConflict,
            severity: ConflictSeverity::Low,
            meetings: vec![m.id],
            description: format!("\"{}\" overlaps the lunch window", m.title),
            impact_score: clamp01(0.3),
            resolution_strategies: vec![ResolutionStrategy::SuggestAlternative, ResolutionStrategy::AutoReschedule],
            metadata: serde_json::Value::Null,
        });
    }
    out
}

fn email_domain(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain)
}

fn has_external_attendee(meeting: &Meeting) -> bool {
    let Some(organizer_domain) = email_domain(&meeting.organizer) else { return false };
    meeting.attendees.iter().any(|a| email_domain(a).map(|d| d != organizer_domain).unwrap_or(false))
}

/// An early/late meeting with at least one attendee outside the organizer's
/// domain, where the local hour is unlikely to work across timezones.
pub fn detect_timezone_conflicts(meetings: &[Meeting]) -> Vec<Conflict> {
    let mut out = Vec::new();
    for m in meetings {
        let hour = m.start_time.hour();
        if !(hour < 8 || hour > 18) {
            continue;
        }
        if !has_external_attendee(m) {
            continue;
        }
        let severity = if hour < 7 || hour > 20 { ConflictSeverity::High } else { ConflictSeverity::Medium };
        out.push(Conflict {
            id: conflict_id(ConflictType::TimezoneConflict, &[m]),
            conflict_type: ConflictType::TimezoneConflict,
            severity,
            meetings: vec![m.id],
            description: format!("\"{}\" starts at local hour {hour} with external attendees", m.title),
            impact_score: clamp01(m.importance_or_default() * 0.8),
            resolution_strategies: vec![ResolutionStrategy::SuggestAlternative, ResolutionStrategy::RequestClarification],
            metadata: serde_json::Value::Null,
        });
    }
    out
}

/// Runs all nine detectors over `meetings` (which need not be pre-sorted)
/// and returns conflicts ordered by severity descending, then impact score
/// descending.
pub fn detect_conflicts(meetings: &[Meeting], config: &DetectionConfig) -> Vec<Conflict> {
    let mut sorted: Vec<Meeting> = meetings.to_vec();
    sorted.sort_by_key(|m| m.start_time);

    let mut conflicts = Vec::new();
    conflicts.extend(detect_double_bookings(&sorted));
    conflicts.extend(detect_direct_overlaps(&sorted));
    conflicts.extend(detect_insufficient_buffers(&sorted));
    conflicts.extend(detect_focus_time_conflicts(&sorted, config));
    conflicts.extend(detect_overloaded_days(&sorted, config));
    conflicts.extend(detect_preparation_time_conflicts(&sorted, config));
    conflicts.extend(detect_commute_conflicts(&sorted, config));
    conflicts.extend(detect_lunch_conflicts(&sorted));
    conflicts.extend(detect_timezone_conflicts(&sorted));

    conflicts.sort_by(|a, b| b.severity.cmp(&a.severity).then(b.impact_score.partial_cmp(&a.impact_score).unwrap()));
    conflicts
}
