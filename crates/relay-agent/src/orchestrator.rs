//! Task orchestrator: capability-based routing, dependency gating, and
//! failure recovery with no-repeat-instance retries.
//!
//! The dispatch loop follows the same shape as a classic master/worker
//! orchestrator: each pass drains the pending queue, partitions it into
//! ready-to-run and still-blocked tasks, dispatches the ready ones
//! concurrently through a bounded execution engine, and reinserts the rest.
//! Where a simpler design assigns tasks to the next idle worker in a pool,
//! this one routes by declared capability, and demotes + retries a failed
//! task on a *different* capable worker before giving up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_events::{EventRouter, ResultCache};
use relay_kernel::{
    BusHandler, EnqueueOutcome, ExecutionEngine, ExecutionStatus, Message, MessageBus, MessageKind,
    Task, TaskId, TaskPriority,
};
use relay_store::MemoryStore;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{AgentError, Result};
use crate::worker::{Worker, WorkerStatus};

/// Adapts a [`Worker`] into a [`BusHandler`] so the bus's per-mailbox
/// dispatch loop can call it directly. A `Request` message's content is
/// `{"kind": ..., "payload": ...}`, unpacked into the worker's own
/// `handle(kind, payload)` call.
struct WorkerBusHandler(Arc<dyn Worker>);

#[async_trait::async_trait]
impl BusHandler for WorkerBusHandler {
    async fn handle_request(&self, message: &Message) -> std::result::Result<Value, String> {
        let kind = message.content.get("kind").and_then(Value::as_str).unwrap_or_default();
        let payload = message.content.get("payload").cloned().unwrap_or(Value::Null);
        self.0.handle(kind, payload).await
    }
}

/// Terminal outcome of a task as recorded by the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    pub task_id: TaskId,
    pub kind: String,
    pub worker: Option<String>,
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Event passed to a registered callback. Mirrors `BaseAgent`'s
/// `on_task_start`/`on_task_complete`/`on_task_error`/`on_status_change`
/// callback hooks, fired by the orchestrator rather than the worker itself.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    TaskStart { worker: &'a str, task_id: &'a TaskId },
    TaskComplete { outcome: &'a OrchestratorOutcome },
    TaskError { outcome: &'a OrchestratorOutcome },
    StatusChange { worker: &'a str, from: WorkerStatus, to: WorkerStatus },
}

pub type Callback = Arc<dyn Fn(WorkerEvent<'_>) + Send + Sync>;

/// Demote a priority one step toward `Background`, the floor.
fn demote(priority: TaskPriority) -> TaskPriority {
    match priority {
        TaskPriority::Critical => TaskPriority::High,
        TaskPriority::High => TaskPriority::Medium,
        TaskPriority::Medium => TaskPriority::Low,
        TaskPriority::Low | TaskPriority::Background => TaskPriority::Background,
    }
}

/// Routes tasks to capability-matched workers, respecting declared
/// dependencies, retrying failures on a different worker up to
/// `max_task_retries` times, and persisting outcomes to the memory store.
pub struct Orchestrator {
    workers: DashMap<String, Arc<dyn Worker>>,
    queue: relay_kernel::TaskQueue,
    engine: ExecutionEngine,
    bus: Arc<MessageBus>,
    events: EventRouter,
    results: DashMap<TaskId, OrchestratorOutcome>,
    last_attempted_worker: DashMap<TaskId, String>,
    retry_counts: DashMap<TaskId, u32>,
    /// Count of tasks currently assigned to each worker, not yet terminally
    /// recorded. Bounded by `config.worker_concurrent_cap`, independently of
    /// the execution engine's global concurrency cap.
    workload: DashMap<String, usize>,
    /// Current lifecycle state of each registered worker, updated only from
    /// the scheduling/completion paths below -- workers never mutate their
    /// own status. `Arc`-wrapped so the health monitor's background task can
    /// inspect and reset it without holding a reference back to `self`.
    status: Arc<DashMap<String, WorkerStatus>>,
    callbacks: Arc<DashMap<&'static str, Vec<Callback>>>,
    config: RuntimeConfig,
    memory: Option<MemoryStore>,
    shutdown: Arc<AtomicBool>,
    health_monitor: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    event_handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(workers: Vec<Arc<dyn Worker>>, config: RuntimeConfig, memory: Option<MemoryStore>) -> Self {
        let queue = relay_kernel::TaskQueue::new(config.task_queue_capacity);
        let engine = ExecutionEngine::new(config.max_concurrent_workers);
        let bus = Arc::new(MessageBus::with_response_timeout(Duration::from_secs(
            config.message_response_timeout_seconds,
        )));
        let events = EventRouter::with_max_retries(
            ResultCache::new(1000, config.event_cache_ttl_seconds),
            config.event_retry_limit,
        );
        let event_handles = events.start();
        let status: Arc<DashMap<String, WorkerStatus>> = Arc::new(DashMap::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let orchestrator = Self {
            workers: DashMap::new(),
            queue,
            engine,
            bus,
            events,
            results: DashMap::new(),
            last_attempted_worker: DashMap::new(),
            retry_counts: DashMap::new(),
            workload: DashMap::new(),
            status,
            callbacks: Arc::new(DashMap::new()),
            config,
            memory,
            shutdown,
            health_monitor: std::sync::Mutex::new(None),
            event_handles: std::sync::Mutex::new(event_handles),
        };

        for worker in workers {
            orchestrator.register(worker);
        }

        let handle = orchestrator.spawn_health_monitor();
        *orchestrator.health_monitor.lock().unwrap() = Some(handle);

        orchestrator
    }

    /// Register a worker at runtime: creates its bus mailbox, attaches a
    /// [`WorkerBusHandler`] so its dispatch loop routes task requests into
    /// the worker's own `handle()`, and marks it `Idle` if this is the first
    /// time it's been seen.
    pub fn register(&self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_string();
        self.bus.register(name.clone());
        self.bus
            .register_handler(name.clone(), Arc::new(WorkerBusHandler(Arc::clone(&worker))));
        self.status.entry(name.clone()).or_insert(WorkerStatus::Idle);
        self.workers.insert(name, worker);
    }

    fn spawn_health_monitor(&self) -> tokio::task::JoinHandle<()> {
        let status = Arc::clone(&self.status);
        let callbacks = Arc::clone(&self.callbacks);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = Duration::from_secs(self.config.health_check_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                let errored: Vec<String> = status
                    .iter()
                    .filter(|e| *e.value() == WorkerStatus::Error)
                    .map(|e| e.key().clone())
                    .collect();

                for worker_name in errored {
                    status.insert(worker_name.clone(), WorkerStatus::Idle);
                    debug!(worker = %worker_name, "health monitor reset worker from error to idle");
                    if let Some(list) = callbacks.get("on_status_change") {
                        for cb in list.iter() {
                            cb(WorkerEvent::StatusChange {
                                worker: &worker_name,
                                from: WorkerStatus::Error,
                                to: WorkerStatus::Idle,
                            });
                        }
                    }
                }
            }
        })
    }

    /// Cancel background loops (health monitor, event router consumers), stop
    /// the execution engine's in-flight work from accepting anything new by
    /// tearing down the bus, and flush the memory store. A no-op on fields
    /// that were never started (e.g. no memory store attached).
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self.health_monitor.lock().unwrap().take() {
            handle.abort();
        }

        self.bus.shutdown();
        self.events.shutdown();
        let event_handles: Vec<_> = self.event_handles.lock().unwrap().drain(..).collect();
        for handle in event_handles {
            let _ = handle.await;
        }

        if let Some(memory) = &self.memory {
            memory.save_all().await?;
        }

        Ok(())
    }

    /// Submit a task. Returns an error if the queue is at capacity.
    pub fn submit(&self, task: Task) -> Result<TaskId> {
        let id = task.id.clone();
        match self.queue.enqueue(task) {
            EnqueueOutcome::Admitted => Ok(id),
            EnqueueOutcome::Dropped => Err(AgentError::Internal(format!(
                "task queue at capacity ({}), dropped task {id}",
                self.config.task_queue_capacity
            ))),
        }
    }

    /// Initialize worker-scoped bookkeeping in the memory store for every
    /// registered worker. A no-op if the orchestrator has no backing store.
    /// Call once after construction, before the first `run()`.
    pub async fn init_workers(&self) -> Result<()> {
        if let Some(memory) = &self.memory {
            for entry in self.workers.iter() {
                memory.init(entry.value().name()).await?;
            }
        }
        Ok(())
    }

    /// Number of tasks still queued (pending dispatch).
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// A completed task's outcome, if the orchestrator has recorded one.
    pub fn outcome(&self, task_id: &TaskId) -> Option<OrchestratorOutcome> {
        self.results.get(task_id).map(|r| r.clone())
    }

    /// Current lifecycle state of a registered worker, if any.
    pub fn worker_status(&self, worker_name: &str) -> Option<WorkerStatus> {
        self.status.get(worker_name).map(|s| *s)
    }

    /// Register a callback invoked on `on_task_start`, `on_task_complete`,
    /// `on_task_error`, and `on_status_change` events across all workers.
    /// Callback failures are not possible at the type level (no `Result`
    /// return); a callback that needs to report failure should log and
    /// swallow it itself.
    pub fn register_callback(&self, event: &'static str, callback: Callback) {
        self.callbacks.entry(event).or_default().push(callback);
    }

    fn fire(&self, event: &'static str, payload: WorkerEvent<'_>) {
        if let Some(list) = self.callbacks.get(event) {
            for cb in list.iter() {
                cb(payload.clone());
            }
        }
    }

    fn set_status(&self, worker_name: &str, to: WorkerStatus) {
        let from = self
            .status
            .insert(worker_name.to_string(), to)
            .unwrap_or(WorkerStatus::Idle);
        if from != to {
            self.fire("on_status_change", WorkerEvent::StatusChange { worker: worker_name, from, to });
        }
    }

    /// Return a worker stuck in `Error` (from a panicked execution) back to
    /// `Idle`. A no-op for any other status or for an unknown worker.
    pub fn reset_worker(&self, worker_name: &str) {
        if self.status.get(worker_name).map(|s| *s) == Some(WorkerStatus::Error) {
            self.set_status(worker_name, WorkerStatus::Idle);
        }
    }

    /// Record feedback against a completed task: tags the persisted
    /// outcome's metadata and, if a memory store is attached, upserts it as
    /// a learned preference scoped to the worker that ran the task.
    pub async fn learn_from_feedback(&self, task_id: &TaskId, feedback: Value) -> Result<()> {
        let Some(worker_name) = self.results.get(task_id).and_then(|o| o.worker.clone()) else {
            return Ok(());
        };
        if let Some(memory) = &self.memory {
            memory
                .put_preference(format!("feedback:{task_id}"), worker_name, feedback.clone(), 1.0)
                .await?;
        }
        if let Some(mut entry) = self.results.get_mut(task_id) {
            let merged = serde_json::json!({"result": entry.output, "feedback": feedback});
            entry.output = Some(merged);
        }
        Ok(())
    }

    /// Whether any registered worker claims `kind` at all, regardless of
    /// current workload.
    fn has_capability(&self, kind: &str) -> bool {
        self.workers.iter().any(|e| e.value().capabilities().contains(&kind))
    }

    /// Select an idle-enough capable worker for `kind`: among workers whose
    /// current workload is below `worker_concurrent_cap`, prefer one other
    /// than `exclude` (the no-repeat-instance-on-retry rule), then the one
    /// with the lowest current workload. Returns `None` if every capable
    /// worker is already at its cap -- a transient condition, not a
    /// permanent failure.
    fn find_worker(&self, kind: &str, exclude: Option<&str>) -> Option<Arc<dyn Worker>> {
        let cap = self.config.worker_concurrent_cap;
        let current_workload = |name: &str| self.workload.get(name).map(|c| *c).unwrap_or(0);

        let under_cap: Vec<Arc<dyn Worker>> = self
            .workers
            .iter()
            .filter(|e| e.value().capabilities().contains(&kind))
            .filter(|e| current_workload(e.value().name()) < cap)
            .map(|e| Arc::clone(e.value()))
            .collect();

        if under_cap.is_empty() {
            return None;
        }

        let mut pool: Vec<&Arc<dyn Worker>> = match exclude {
            Some(exclude) if under_cap.len() > 1 => {
                under_cap.iter().filter(|w| w.name() != exclude).collect()
            }
            _ => under_cap.iter().collect(),
        };
        if pool.is_empty() {
            pool = under_cap.iter().collect();
        }

        pool.into_iter().min_by_key(|w| current_workload(w.name())).cloned()
    }

    /// Run one drain-dispatch-collect pass over the queue. Returns
    /// `(dispatched, permanently_resolved)` -- if both are zero and the
    /// queue is non-empty, the remaining tasks are stalled on dependencies
    /// that will never resolve in this pass.
    async fn dispatch_pass(&self) -> (usize, usize) {
        let mut drained = Vec::new();
        while let Some(task) = self.queue.dequeue() {
            drained.push(task);
        }

        let mut ready = Vec::new();
        let mut permanently_resolved = 0usize;

        for task in drained {
            if task.dependencies.is_empty() {
                ready.push(task);
                continue;
            }

            let mut all_present = true;
            let mut any_failed = false;
            for dep in &task.dependencies {
                match self.results.get(dep) {
                    Some(r) => {
                        if r.status != ExecutionStatus::Success {
                            any_failed = true;
                        }
                    }
                    None => all_present = false,
                }
            }

            if any_failed {
                let missing = task
                    .dependencies
                    .iter()
                    .map(TaskId::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                warn!(task_id = %task.id, "dependency failed, failing task");
                self.results.insert(
                    task.id.clone(),
                    OrchestratorOutcome {
                        task_id: task.id.clone(),
                        kind: task.kind.clone(),
                        worker: None,
                        status: ExecutionStatus::Error,
                        output: None,
                        error: Some(
                            AgentError::DependencyUnsatisfied {
                                task_id: task.id.clone(),
                                missing,
                            }
                            .to_string(),
                        ),
                        attempts: 0,
                    },
                );
                permanently_resolved += 1;
            } else if all_present {
                ready.push(task);
            } else {
                // Still waiting on a dependency that hasn't finished yet.
                self.queue.enqueue(task);
            }
        }

        let mut handles = Vec::new();
        for task in ready {
            if !self.has_capability(&task.kind) {
                warn!(task_id = %task.id, kind = %task.kind, "no capable worker registered");
                self.results.insert(
                    task.id.clone(),
                    OrchestratorOutcome {
                        task_id: task.id.clone(),
                        kind: task.kind.clone(),
                        worker: None,
                        status: ExecutionStatus::Error,
                        output: None,
                        error: Some(
                            AgentError::NoCapableWorker {
                                kind: task.kind.clone(),
                            }
                            .to_string(),
                        ),
                        attempts: 0,
                    },
                );
                permanently_resolved += 1;
                continue;
            }

            let exclude = self.last_attempted_worker.get(&task.id).map(|e| e.clone());
            let Some(worker) = self.find_worker(&task.kind, exclude.as_deref()) else {
                // Every capable worker is at its workload cap; try again
                // next pass rather than failing the task.
                self.queue.enqueue(task);
                continue;
            };

            self.last_attempted_worker
                .insert(task.id.clone(), worker.name().to_string());
            *self.workload.entry(worker.name().to_string()).or_insert(0) += 1;
            self.set_status(worker.name(), WorkerStatus::Working);
            self.fire("on_task_start", WorkerEvent::TaskStart { worker: worker.name(), task_id: &task.id });

            let engine = self.engine.clone();
            let bus = Arc::clone(&self.bus);
            let task_id = task.id.clone();
            let worker_name = worker.name().to_string();
            let kind = task.kind.clone();
            let payload = task.parameters.clone();
            let task_for_retry = task.clone();

            let spawned_worker_name = worker.name().to_string();
            let dispatch_target = worker.name().to_string();
            let handle = tokio::spawn(async move {
                let result = engine
                    .execute(task_id, worker_name, None, move || async move {
                        let response = bus
                            .send(
                                "orchestrator",
                                dispatch_target,
                                MessageKind::Request,
                                serde_json::json!({"kind": kind, "payload": payload}),
                                true,
                                5,
                            )
                            .await
                            .map_err(|e| e.to_string())?;
                        let envelope = response.unwrap_or(Value::Null);
                        if envelope.get("ok").and_then(Value::as_bool) == Some(true) {
                            Ok(envelope.get("value").cloned().unwrap_or(Value::Null))
                        } else {
                            Err(envelope
                                .get("error")
                                .and_then(Value::as_str)
                                .unwrap_or("worker dispatch failed")
                                .to_string())
                        }
                    })
                    .await;
                (task_for_retry, result)
            });
            handles.push((spawned_worker_name, handle));
        }

        let dispatched = handles.len();

        for (worker_name, handle) in handles {
            match handle.await {
                Ok((task, result)) => {
                    self.handle_execution_result(task, result).await;
                    self.set_status(&worker_name, WorkerStatus::Idle);
                }
                Err(join_err) => {
                    warn!(worker = %worker_name, error = %join_err, "worker task panicked");
                    if let Some(mut entry) = self.workload.get_mut(&worker_name) {
                        *entry = entry.saturating_sub(1);
                    }
                    self.set_status(&worker_name, WorkerStatus::Error);
                }
            }
        }

        (dispatched, permanently_resolved)
    }

    async fn handle_execution_result(&self, task: Task, result: relay_kernel::TaskResult) {
        if let Some(mut entry) = self.workload.get_mut(&result.worker_name) {
            *entry = entry.saturating_sub(1);
        }

        if let Some(memory) = &self.memory {
            let status_str = match result.status {
                ExecutionStatus::Success => "success",
                ExecutionStatus::Error => "error",
                ExecutionStatus::Timeout => "timeout",
            };
            let _ = memory
                .record_result(
                    task.id.to_string(),
                    result.worker_name.clone(),
                    status_str,
                    result.result.clone(),
                    result.error.clone(),
                    Some(result.execution_time.as_secs_f64()),
                    None,
                )
                .await;
        }

        if result.status == ExecutionStatus::Success {
            let outcome = OrchestratorOutcome {
                task_id: task.id.clone(),
                kind: task.kind.clone(),
                worker: Some(result.worker_name.clone()),
                status: result.status,
                output: result.result,
                error: None,
                attempts: self.retry_counts.get(&task.id).map(|c| *c).unwrap_or(0) + 1,
            };
            self.results.insert(task.id.clone(), outcome);
            if let Some(outcome) = self.results.get(&task.id) {
                self.fire("on_task_complete", WorkerEvent::TaskComplete { outcome: &*outcome });
            }
            return;
        }

        let attempts = {
            let mut entry = self.retry_counts.entry(task.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if self.config.failure_recovery && attempts < self.config.max_task_retries {
            debug!(task_id = %task.id, attempts, "retrying task on a different worker");
            let mut retried = task.clone();
            retried.priority = demote(retried.priority);
            self.queue.enqueue(retried);
        } else {
            warn!(task_id = %task.id, attempts, "task permanently failed");
            let outcome = OrchestratorOutcome {
                task_id: task.id.clone(),
                kind: task.kind.clone(),
                worker: Some(result.worker_name.clone()),
                status: result.status,
                output: result.result,
                error: result.error,
                attempts,
            };
            self.results.insert(task.id.clone(), outcome);
            if let Some(outcome) = self.results.get(&task.id) {
                self.fire("on_task_error", WorkerEvent::TaskError { outcome: &*outcome });
            }
        }
    }

    /// Drain the queue to completion: repeatedly dispatch ready tasks until
    /// the queue is empty or progress stalls (remaining tasks depend on a
    /// task that will never finish, e.g. one removed by a prior stalled
    /// run). Returns every outcome recorded during this call.
    pub async fn run(&self) -> Vec<OrchestratorOutcome> {
        let before_ids: std::collections::HashSet<TaskId> =
            self.results.iter().map(|e| e.key().clone()).collect();

        loop {
            if self.queue.is_empty() {
                break;
            }

            let (dispatched, resolved) = self.dispatch_pass().await;

            if dispatched == 0 && resolved == 0 {
                if self.config.dependency_backoff_seconds == 0 {
                    warn!(pending = self.queue.len(), "dispatch stalled, giving up for this run");
                    break;
                }
                // One more attempt after the configured backoff before
                // declaring a stall -- allows in-flight dependents from a
                // concurrently running call to finish.
                tokio::time::sleep(Duration::from_millis(50)).await;
                let (dispatched2, resolved2) = self.dispatch_pass().await;
                if dispatched2 == 0 && resolved2 == 0 {
                    warn!(pending = self.queue.len(), "dispatch stalled, giving up for this run");
                    break;
                }
            }
        }

        self.results
            .iter()
            .filter(|e| !before_ids.contains(e.key()))
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{MeetingPrepWorker, ResearchWorker};

    fn orchestrator(workers: Vec<Arc<dyn Worker>>) -> Orchestrator {
        Orchestrator::new(workers, RuntimeConfig::default(), None)
    }

    #[tokio::test]
    async fn routes_to_capable_worker() {
        let orch = orchestrator(vec![Arc::new(MeetingPrepWorker), Arc::new(ResearchWorker)]);
        let task = Task::new("meeting_prep", "prep", TaskPriority::Medium);
        let id = orch.submit(task).unwrap();

        let outcomes = orch.run().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].task_id, id);
        assert_eq!(outcomes[0].status, ExecutionStatus::Success);
        assert_eq!(outcomes[0].worker.as_deref(), Some("meeting-prep"));
    }

    #[tokio::test]
    async fn no_capable_worker_fails_immediately() {
        let orch = orchestrator(vec![Arc::new(MeetingPrepWorker)]);
        let task = Task::new("unrouted_kind", "nothing handles this", TaskPriority::Medium);
        orch.submit(task).unwrap();

        let outcomes = orch.run().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ExecutionStatus::Error);
        assert!(outcomes[0].error.as_ref().unwrap().contains("no capable worker"));
    }

    #[tokio::test]
    async fn dependency_gates_dispatch_order() {
        let orch = orchestrator(vec![Arc::new(MeetingPrepWorker)]);
        let producer = Task::new("meeting_prep", "producer", TaskPriority::Medium);
        let producer_id = producer.id.clone();

        let mut consumer = Task::new("meeting_prep", "consumer", TaskPriority::Medium);
        consumer.dependencies.push(producer_id.clone());

        orch.submit(consumer).unwrap();
        orch.submit(producer).unwrap();

        let outcomes = orch.run().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == ExecutionStatus::Success));
    }

    #[tokio::test]
    async fn dependency_failure_propagates() {
        let orch = orchestrator(vec![Arc::new(ResearchWorker)]);
        let mut producer = Task::new("research", "producer", TaskPriority::Medium);
        producer.parameters = serde_json::json!({}); // missing `query` -> fails
        let producer_id = producer.id.clone();

        let mut consumer = Task::new("research", "consumer", TaskPriority::Medium);
        consumer.parameters = serde_json::json!({"query": "x"});
        consumer.dependencies.push(producer_id);

        orch.submit(consumer).unwrap();
        orch.submit(producer).unwrap();

        let outcomes = orch.run().await;
        assert_eq!(outcomes.len(), 2);
        let consumer_outcome = outcomes
            .iter()
            .find(|o| o.error.as_ref().is_some_and(|e| e.contains("dependency unsatisfied")))
            .expect("consumer should fail due to dependency");
        assert_eq!(consumer_outcome.status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn failed_task_retries_on_different_worker_then_succeeds() {
        struct FlakyOnce(std::sync::atomic::AtomicBool);

        #[async_trait::async_trait]
        impl Worker for FlakyOnce {
            fn name(&self) -> &str {
                "flaky"
            }
            fn capabilities(&self) -> &[&str] {
                &["flaky_kind"]
            }
            async fn handle(&self, _kind: &str, _payload: Value) -> std::result::Result<Value, String> {
                if self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    Ok(serde_json::json!({"ok": true}))
                } else {
                    Err("first attempt always fails".to_string())
                }
            }
        }

        struct AlwaysOk;
        #[async_trait::async_trait]
        impl Worker for AlwaysOk {
            fn name(&self) -> &str {
                "reliable"
            }
            fn capabilities(&self) -> &[&str] {
                &["flaky_kind"]
            }
            async fn handle(&self, _kind: &str, _payload: Value) -> std::result::Result<Value, String> {
                Ok(serde_json::json!({"ok": true}))
            }
        }

        let workers: Vec<Arc<dyn Worker>> = vec![
            Arc::new(FlakyOnce(std::sync::atomic::AtomicBool::new(false))),
            Arc::new(AlwaysOk),
        ];
        let orch = orchestrator(workers);
        let task = Task::new("flaky_kind", "retry me", TaskPriority::Medium);
        orch.submit(task).unwrap();

        let outcomes = orch.run().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn exhausting_retries_produces_permanent_failure() {
        let mut config = RuntimeConfig::default();
        config.max_task_retries = 1;
        let orch = Orchestrator::new(vec![Arc::new(ResearchWorker)], config, None);

        let task = Task::new("research", "always missing query", TaskPriority::Medium);
        orch.submit(task).unwrap();

        let outcomes = orch.run().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ExecutionStatus::Error);
        assert_eq!(outcomes[0].attempts, 1);
    }

    #[test]
    fn demote_floors_at_background() {
        assert_eq!(demote(TaskPriority::Critical), TaskPriority::High);
        assert_eq!(demote(TaskPriority::Background), TaskPriority::Background);
    }

    #[tokio::test]
    async fn successful_run_cycles_worker_status_idle_working_idle() {
        let orch = orchestrator(vec![Arc::new(MeetingPrepWorker)]);
        assert_eq!(orch.worker_status("meeting-prep"), Some(WorkerStatus::Idle));

        let task = Task::new("meeting_prep", "prep", TaskPriority::Medium);
        orch.submit(task).unwrap();
        orch.run().await;

        assert_eq!(orch.worker_status("meeting-prep"), Some(WorkerStatus::Idle));
    }

    #[tokio::test]
    async fn register_callback_observes_start_and_complete_events() {
        use std::sync::Mutex;

        let orch = orchestrator(vec![Arc::new(MeetingPrepWorker)]);
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let seen_start = Arc::clone(&seen);
        orch.register_callback(
            "on_task_start",
            Arc::new(move |_event| seen_start.lock().unwrap().push("start")),
        );
        let seen_complete = Arc::clone(&seen);
        orch.register_callback(
            "on_task_complete",
            Arc::new(move |_event| seen_complete.lock().unwrap().push("complete")),
        );

        let task = Task::new("meeting_prep", "prep", TaskPriority::Medium);
        orch.submit(task).unwrap();
        orch.run().await;

        assert_eq!(*seen.lock().unwrap(), vec!["start", "complete"]);
    }

    #[tokio::test]
    async fn register_callback_observes_task_error() {
        use std::sync::Mutex;

        let mut config = RuntimeConfig::default();
        config.max_task_retries = 1;
        let orch = Orchestrator::new(vec![Arc::new(ResearchWorker)], config, None);
        let errors: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));

        let errors_clone = Arc::clone(&errors);
        orch.register_callback(
            "on_task_error",
            Arc::new(move |_event| *errors_clone.lock().unwrap() += 1),
        );

        let task = Task::new("research", "missing query", TaskPriority::Medium);
        orch.submit(task).unwrap();
        orch.run().await;

        assert_eq!(*errors.lock().unwrap(), 1);
    }

    #[test]
    fn reset_worker_clears_error_status_but_not_other_states() {
        let orch = orchestrator(vec![Arc::new(MeetingPrepWorker)]);

        orch.reset_worker("meeting-prep");
        assert_eq!(orch.worker_status("meeting-prep"), Some(WorkerStatus::Idle));

        orch.set_status("meeting-prep", WorkerStatus::Error);
        orch.reset_worker("meeting-prep");
        assert_eq!(orch.worker_status("meeting-prep"), Some(WorkerStatus::Idle));

        orch.set_status("meeting-prep", WorkerStatus::Working);
        orch.reset_worker("meeting-prep");
        assert_eq!(orch.worker_status("meeting-prep"), Some(WorkerStatus::Working));
    }

    #[tokio::test]
    async fn learn_from_feedback_merges_feedback_into_outcome() {
        let orch = orchestrator(vec![Arc::new(MeetingPrepWorker)]);
        let task = Task::new("meeting_prep", "prep", TaskPriority::Medium);
        let id = orch.submit(task).unwrap();
        orch.run().await;

        orch.learn_from_feedback(&id, serde_json::json!({"rating": "good"}))
            .await
            .unwrap();

        let outcome = orch.outcome(&id).unwrap();
        assert_eq!(outcome.output.unwrap()["feedback"], serde_json::json!({"rating": "good"}));
    }

    #[tokio::test]
    async fn init_workers_seeds_context_for_each_registered_worker() {
        let db = relay_store::Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = relay_store::MemoryStore::new(db);
        let orch = Orchestrator::new(
            vec![Arc::new(MeetingPrepWorker), Arc::new(ResearchWorker)],
            RuntimeConfig::default(),
            Some(store.clone()),
        );

        orch.init_workers().await.unwrap();

        let ctx = store.get_context("meeting-prep", None).await.unwrap();
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx[0].context_type, "initialization");
    }

    #[tokio::test]
    async fn register_adds_a_worker_usable_by_a_later_submit() {
        let orch = orchestrator(vec![Arc::new(MeetingPrepWorker)]);
        assert_eq!(orch.worker_status("research"), None);

        orch.register(Arc::new(ResearchWorker));
        assert_eq!(orch.worker_status("research"), Some(WorkerStatus::Idle));

        let task = Task::new("research", "added after construction", TaskPriority::Medium);
        task_with_query(&orch, task).await;
    }

    async fn task_with_query(orch: &Orchestrator, mut task: Task) {
        task.parameters = serde_json::json!({"query": "late-bound worker"});
        let id = orch.submit(task).unwrap();
        orch.run().await;
        let outcome = orch.outcome(&id).unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn shutdown_flushes_memory_store_and_stops_background_loops() {
        let db = relay_store::Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = relay_store::MemoryStore::new(db);
        let orch = Orchestrator::new(vec![Arc::new(MeetingPrepWorker)], RuntimeConfig::default(), Some(store));

        let task = Task::new("meeting_prep", "prep", TaskPriority::Medium);
        orch.submit(task).unwrap();
        orch.run().await;

        orch.shutdown().await.unwrap();
        assert_eq!(orch.bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn health_monitor_resets_errored_worker_without_manual_intervention() {
        let mut config = RuntimeConfig::default();
        config.health_check_interval_seconds = 1;
        let orch = Orchestrator::new(vec![Arc::new(MeetingPrepWorker)], config, None);

        orch.set_status("meeting-prep", WorkerStatus::Error);
        assert_eq!(orch.worker_status("meeting-prep"), Some(WorkerStatus::Error));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(orch.worker_status("meeting-prep"), Some(WorkerStatus::Idle));

        orch.shutdown().await.unwrap();
    }
}
