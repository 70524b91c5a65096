//! Worker abstraction.
//!
//! Workers are specialised agents that handle one or more task *kinds*.
//! The orchestrator routes a task to whichever registered worker claims its
//! kind. Each worker implementation is free to do real work (call an LLM,
//! hit an external API, query the store); the five concrete workers below
//! are intentionally thin and deterministic so the orchestrator's routing
//! and retry behavior can be tested without network access.

use async_trait::async_trait;
use serde_json::Value;

/// Lifecycle state of a worker as tracked by the orchestrator. Workers never
/// mutate their own status -- only the orchestrator's scheduling/completion
/// paths do, per the runtime's shared-resource policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Working,
    Waiting,
    Error,
}

/// A specialised agent capable of executing tasks of certain kinds.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable, unique name used for routing, logging, and learned-preference
    /// scoping (e.g. `"meeting-prep"`).
    fn name(&self) -> &str;

    /// The task kinds this worker claims. The orchestrator routes a task to
    /// the first registered worker whose `capabilities()` contains the
    /// task's kind.
    fn capabilities(&self) -> &[&str];

    /// Execute `payload` for a task of one of this worker's claimed kinds.
    /// Returns the task's result payload on success, or an error message
    /// (not an `AgentError`) on failure -- matching the kernel execution
    /// engine's `Result<Value, String>` worker contract.
    async fn handle(&self, task_kind: &str, payload: Value) -> std::result::Result<Value, String>;
}

/// Prepares meeting materials: agenda assembly, attendee context lookup.
pub struct MeetingPrepWorker;

#[async_trait]
impl Worker for MeetingPrepWorker {
    fn name(&self) -> &str {
        "meeting-prep"
    }

    fn capabilities(&self) -> &[&str] {
        &["meeting_prep", "agenda_build"]
    }

    async fn handle(&self, task_kind: &str, payload: Value) -> std::result::Result<Value, String> {
        Ok(serde_json::json!({
            "worker": self.name(),
            "kind": task_kind,
            "agenda": payload.get("topic").cloned().unwrap_or(Value::Null),
            "status": "prepared",
        }))
    }
}

/// Breaks a high-level goal into ordered subtasks.
pub struct TaskDecompositionWorker;

#[async_trait]
impl Worker for TaskDecompositionWorker {
    fn name(&self) -> &str {
        "task-decomposition"
    }

    fn capabilities(&self) -> &[&str] {
        &["decompose"]
    }

    async fn handle(&self, task_kind: &str, payload: Value) -> std::result::Result<Value, String> {
        let goal = payload
            .get("goal")
            .and_then(Value::as_str)
            .unwrap_or("unspecified goal");
        Ok(serde_json::json!({
            "worker": self.name(),
            "kind": task_kind,
            "subtasks": [format!("research: {goal}"), format!("synthesize: {goal}")],
        }))
    }
}

/// Drafts and routes inter-human or inter-worker communication.
pub struct CommunicationWorker;

#[async_trait]
impl Worker for CommunicationWorker {
    fn name(&self) -> &str {
        "communication"
    }

    fn capabilities(&self) -> &[&str] {
        &["draft_message", "notify"]
    }

    async fn handle(&self, task_kind: &str, payload: Value) -> std::result::Result<Value, String> {
        let subject = payload
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("(no subject)");
        Ok(serde_json::json!({
            "worker": self.name(),
            "kind": task_kind,
            "draft": format!("Re: {subject}"),
        }))
    }
}

/// Gathers and synthesises information from available context.
pub struct ResearchWorker;

#[async_trait]
impl Worker for ResearchWorker {
    fn name(&self) -> &str {
        "research"
    }

    fn capabilities(&self) -> &[&str] {
        &["research", "summarize"]
    }

    async fn handle(&self, task_kind: &str, payload: Value) -> std::result::Result<Value, String> {
        let query = payload
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| "research task payload missing `query`".to_string())?;
        Ok(serde_json::json!({
            "worker": self.name(),
            "kind": task_kind,
            "findings": format!("notes on: {query}"),
        }))
    }
}

/// Rebalances meeting and task schedules to resolve timing pressure.
pub struct ScheduleOptimizerWorker;

#[async_trait]
impl Worker for ScheduleOptimizerWorker {
    fn name(&self) -> &str {
        "schedule-optimizer"
    }

    fn capabilities(&self) -> &[&str] {
        &["optimize_schedule", "reschedule"]
    }

    async fn handle(&self, task_kind: &str, payload: Value) -> std::result::Result<Value, String> {
        Ok(serde_json::json!({
            "worker": self.name(),
            "kind": task_kind,
            "slots_considered": payload.get("candidate_slots").cloned().unwrap_or(Value::Array(vec![])),
            "status": "optimized",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn meeting_prep_echoes_topic() {
        let worker = MeetingPrepWorker;
        let result = worker
            .handle("meeting_prep", serde_json::json!({"topic": "Q3 roadmap"}))
            .await
            .unwrap();
        assert_eq!(result["agenda"], serde_json::json!("Q3 roadmap"));
    }

    #[tokio::test]
    async fn research_worker_requires_query() {
        let worker = ResearchWorker;
        let result = worker.handle("research", serde_json::json!({})).await;
        assert!(result.is_err());
    }

    #[test]
    fn capabilities_are_distinct_per_worker() {
        let workers: Vec<Box<dyn Worker>> = vec![
            Box::new(MeetingPrepWorker),
            Box::new(TaskDecompositionWorker),
            Box::new(CommunicationWorker),
            Box::new(ResearchWorker),
            Box::new(ScheduleOptimizerWorker),
        ];
        let names: Vec<&str> = workers.iter().map(|w| w.name()).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }
}
