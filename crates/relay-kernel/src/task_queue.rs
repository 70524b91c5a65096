//! Bounded priority task queue.
//!
//! Tasks are held in a binary max-heap ordered by `(priority, enqueue
//! sequence)` so that, among tasks of equal priority, the one admitted
//! earliest is dequeued first. Removal and re-prioritization are O(n): the
//! heap is rebuilt from its element list, mirroring the reference
//! implementation this module is ported from, which rebuilds via
//! `heapq.heapify` on every mutation outside of plain push/pop.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KernelError, Result};

/// Unique task identifier of the form `task_<16 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh, time-ordered task id.
    #[must_use]
    pub fn new() -> Self {
        let hex = Uuid::now_v7().simple().to_string();
        Self(format!("task_{}", &hex[..16]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Lower enum value sorts first out of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
    Background = 4,
}

/// A unit of work submitted to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub priority: TaskPriority,
    pub requester: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub dependencies: Vec<TaskId>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(kind: impl Into<String>, description: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            id: TaskId::new(),
            kind: kind.into(),
            description: description.into(),
            parameters: serde_json::Value::Null,
            priority,
            requester: None,
            deadline: None,
            dependencies: Vec::new(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an `enqueue` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Admitted,
    Dropped,
}

/// Aggregate statistics about the queue's history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_dropped: u64,
    pub avg_wait_time_ms: f64,
    pub priority_distribution: HashMap<String, u64>,
    pub oldest_pending_wait_ms: Option<i64>,
}

struct Entry {
    task: Task,
    priority: TaskPriority,
    sequence: u64,
    enqueued_at: DateTime<Utc>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; Critical (enum value 0) must win, so we
        // invert the priority comparison. Among equal priorities, the
        // earlier sequence number wins (FIFO), so it too is inverted.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct State {
    heap: BinaryHeap<Entry>,
    index: HashMap<TaskId, ()>,
    next_sequence: u64,
    capacity: usize,
    stats: QueueStats,
}

/// Bounded, priority-ordered, FIFO-tie-broken task queue.
pub struct TaskQueue {
    state: Mutex<State>,
}

impl TaskQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                index: HashMap::new(),
                next_sequence: 0,
                capacity,
                stats: QueueStats::default(),
            }),
        }
    }

    /// Admit a task, or report that it was dropped because the queue is at
    /// capacity.
    pub fn enqueue(&self, task: Task) -> EnqueueOutcome {
        let mut state = self.state.lock().expect("task queue mutex poisoned");
        if state.heap.len() >= state.capacity {
            state.stats.total_dropped += 1;
            tracing::warn!(task_id = %task.id, "task queue full, dropping task");
            return EnqueueOutcome::Dropped;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let priority_key = format!("{:?}", task.priority);
        *state.stats.priority_distribution.entry(priority_key).or_insert(0) += 1;
        state.stats.total_enqueued += 1;
        state.index.insert(task.id.clone(), ());

        tracing::debug!(task_id = %task.id, priority = ?task.priority, "task enqueued");

        state.heap.push(Entry {
            priority: task.priority,
            sequence,
            enqueued_at: Utc::now(),
            task,
        });

        EnqueueOutcome::Admitted
    }

    /// Pop the highest-priority, earliest-enqueued task.
    pub fn dequeue(&self) -> Option<Task> {
        let mut state = self.state.lock().expect("task queue mutex poisoned");
        let entry = state.heap.pop()?;
        state.index.remove(&entry.task.id);

        let wait_ms = (Utc::now() - entry.enqueued_at).num_milliseconds() as f64;
        let n = state.stats.total_dequeued + 1;
        state.stats.avg_wait_time_ms =
            (state.stats.avg_wait_time_ms * (n - 1) as f64 + wait_ms) / n as f64;
        state.stats.total_dequeued = n;

        tracing::debug!(task_id = %entry.task.id, wait_ms, "task dequeued");
        Some(entry.task)
    }

    /// Non-destructively view the highest-priority task.
    pub fn peek(&self) -> Option<Task> {
        let state = self.state.lock().expect("task queue mutex poisoned");
        state.heap.peek().map(|e| e.task.clone())
    }

    /// Remove a specific task from the queue by id.
    pub fn remove(&self, task_id: &TaskId) -> bool {
        let mut state = self.state.lock().expect("task queue mutex poisoned");
        if !state.index.contains_key(task_id) {
            return false;
        }
        let remaining: Vec<Entry> = state
            .heap
            .drain()
            .filter(|e| &e.task.id != task_id)
            .collect();
        state.heap = BinaryHeap::from(remaining);
        state.index.remove(task_id);
        true
    }

    /// Change a pending task's priority and restore heap order.
    pub fn reprioritize(&self, task_id: &TaskId, new_priority: TaskPriority) -> Result<()> {
        let mut state = self.state.lock().expect("task queue mutex poisoned");
        if !state.index.contains_key(task_id) {
            return Err(KernelError::TaskNotFound {
                task_id: task_id.clone(),
            });
        }
        let mut entries: Vec<Entry> = state.heap.drain().collect();
        for entry in &mut entries {
            if &entry.task.id == task_id {
                entry.priority = new_priority;
                entry.task.priority = new_priority;
            }
        }
        state.heap = BinaryHeap::from(entries);
        Ok(())
    }

    /// All pending tasks at the given priority, in no particular order.
    pub fn by_priority(&self, priority: TaskPriority) -> Vec<Task> {
        let state = self.state.lock().expect("task queue mutex poisoned");
        state
            .heap
            .iter()
            .filter(|e| e.priority == priority)
            .map(|e| e.task.clone())
            .collect()
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.state.lock().expect("task queue mutex poisoned").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let state = self.state.lock().expect("task queue mutex poisoned");
        state.heap.len() >= state.capacity
    }

    /// Snapshot of queue statistics, including the oldest pending task's wait
    /// time at the moment of the call.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().expect("task queue mutex poisoned");
        let mut stats = state.stats.clone();
        stats.oldest_pending_wait_ms = state
            .heap
            .iter()
            .map(|e| (Utc::now() - e.enqueued_at).num_milliseconds())
            .max();
        stats
    }

    /// Remove all pending tasks.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("task queue mutex poisoned");
        state.heap.clear();
        state.index.clear();
    }
}

/// Polls a shared [`TaskQueue`] until a task is available or `timeout`
/// elapses, returning `None` on timeout. Useful for consumer loops that would
/// otherwise busy-poll `dequeue`.
pub async fn dequeue_with_timeout(queue: &TaskQueue, poll_interval: Duration, timeout: Duration) -> Option<Task> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(task) = queue.dequeue() {
            return Some(task);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(priority: TaskPriority) -> Task {
        Task::new("test", "test task", priority)
    }

    #[test]
    fn priority_ordering_with_fifo_tiebreak() {
        let q = TaskQueue::new(10);
        let low = task(TaskPriority::Low);
        let low_id = low.id.clone();
        q.enqueue(low);
        let critical = task(TaskPriority::Critical);
        let critical_id = critical.id.clone();
        q.enqueue(critical);
        let medium1 = task(TaskPriority::Medium);
        let medium1_id = medium1.id.clone();
        q.enqueue(medium1);
        let medium2 = task(TaskPriority::Medium);
        let medium2_id = medium2.id.clone();
        q.enqueue(medium2);

        assert_eq!(q.dequeue().unwrap().id, critical_id);
        assert_eq!(q.dequeue().unwrap().id, medium1_id);
        assert_eq!(q.dequeue().unwrap().id, medium2_id);
        assert_eq!(q.dequeue().unwrap().id, low_id);
    }

    #[test]
    fn capacity_enforced() {
        let q = TaskQueue::new(1);
        assert_eq!(q.enqueue(task(TaskPriority::Medium)), EnqueueOutcome::Admitted);
        assert_eq!(q.enqueue(task(TaskPriority::Critical)), EnqueueOutcome::Dropped);
        assert_eq!(q.stats().total_dropped, 1);
    }

    #[test]
    fn peek_is_non_destructive() {
        let q = TaskQueue::new(10);
        q.enqueue(task(TaskPriority::High));
        let peeked = q.peek().unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.dequeue().unwrap().id, peeked.id);
    }

    #[test]
    fn remove_by_id() {
        let q = TaskQueue::new(10);
        let t = task(TaskPriority::Medium);
        let id = t.id.clone();
        q.enqueue(t);
        q.enqueue(task(TaskPriority::Low));

        assert!(q.remove(&id));
        assert!(!q.remove(&id));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn reprioritize_changes_dequeue_order() {
        let q = TaskQueue::new(10);
        let first = task(TaskPriority::Low);
        let first_id = first.id.clone();
        q.enqueue(first);
        q.enqueue(task(TaskPriority::Medium));

        q.reprioritize(&first_id, TaskPriority::Critical).unwrap();
        assert_eq!(q.dequeue().unwrap().id, first_id);
    }

    #[test]
    fn reprioritize_unknown_task_errors() {
        let q = TaskQueue::new(10);
        let result = q.reprioritize(&TaskId::new(), TaskPriority::Critical);
        assert!(matches!(result, Err(KernelError::TaskNotFound { .. })));
    }

    #[test]
    fn dequeue_empty_returns_none() {
        let q = TaskQueue::new(10);
        assert!(q.dequeue().is_none());
    }

    #[tokio::test]
    async fn dequeue_with_timeout_returns_none_when_empty() {
        let q = TaskQueue::new(10);
        let result = dequeue_with_timeout(&q, Duration::from_millis(5), Duration::from_millis(20)).await;
        assert!(result.is_none());
    }
}
