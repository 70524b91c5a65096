//! Integration tests for the relay-kernel crate.
//!
//! These tests exercise the task queue, execution engine, and message bus as
//! integrated subsystems working together end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use relay_kernel::{EnqueueOutcome, ExecutionEngine, ExecutionStatus, MessageBus, MessageKind, Task, TaskPriority, TaskQueue};

#[test]
fn priority_ordering_scenario() {
    // Submit tasks A(LOW), B(CRITICAL), C(MEDIUM) with no dependencies;
    // dequeue three times should yield [B, C, A].
    let queue = TaskQueue::new(100);
    let a = Task::new("kind", "A", TaskPriority::Low);
    let b = Task::new("kind", "B", TaskPriority::Critical);
    let c = Task::new("kind", "C", TaskPriority::Medium);

    let a_id = a.id.clone();
    let b_id = b.id.clone();
    let c_id = c.id.clone();

    queue.enqueue(a);
    queue.enqueue(b);
    queue.enqueue(c);

    assert_eq!(queue.dequeue().unwrap().id, b_id);
    assert_eq!(queue.dequeue().unwrap().id, c_id);
    assert_eq!(queue.dequeue().unwrap().id, a_id);
}

#[tokio::test]
async fn concurrency_cap_bounds_parallel_execution() {
    let engine = ExecutionEngine::new(2);
    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..5 {
        let engine = engine.clone();
        let concurrent = Arc::clone(&concurrent);
        let max_seen = Arc::clone(&max_seen);
        let queue = TaskQueue::new(10);
        let task = Task::new("sleep", format!("task-{i}"), TaskPriority::Medium);
        let id = task.id.clone();
        queue.enqueue(task);
        let dequeued = queue.dequeue().unwrap();
        assert_eq!(dequeued.id, id);

        handles.push(tokio::spawn(async move {
            engine
                .execute(dequeued.id, "worker", None, move || async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    Ok(serde_json::Value::Null)
                })
                .await
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    assert!(max_seen.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn request_with_no_responder_times_out() {
    let bus = MessageBus::with_response_timeout(Duration::from_millis(50));
    bus.register("agent-a");
    bus.register("agent-b");

    let result = bus
        .send("agent-a", "agent-b", MessageKind::Request, serde_json::json!({"q": 1}), true, 5)
        .await;

    assert!(result.is_err());
    assert_eq!(bus.pending_count(), 0);
}

#[tokio::test]
async fn full_task_lifecycle_through_queue_and_engine() {
    let queue = TaskQueue::new(10);
    let engine = ExecutionEngine::new(1);

    let task = Task::new("research", "gather notes", TaskPriority::High);
    assert_eq!(queue.enqueue(task), EnqueueOutcome::Admitted);

    let dequeued = queue.dequeue().expect("task should be present");
    let result = engine
        .execute(dequeued.id.clone(), "research-worker", None, || async {
            Ok(serde_json::json!({"notes": "done"}))
        })
        .await;

    assert_eq!(result.task_id, dequeued.id);
    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn broadcast_reaches_all_other_registered_workers() {
    let bus = MessageBus::new();
    for id in ["a", "b", "c", "d"] {
        bus.register(id);
    }

    let delivered = bus.broadcast("a", serde_json::json!({"kind": "knowledge_sharing"}), None);
    assert_eq!(delivered, 3);

    for id in ["b", "c", "d"] {
        let message = bus.receive(id).await.unwrap();
        assert_eq!(message.kind, MessageKind::Broadcast);
        assert_eq!(message.priority, 7);
    }
}
