//! Bounded-concurrency execution engine.
//!
//! Wraps worker invocations with a global concurrency permit, an optional
//! per-call timeout, and pre/post hooks. Ported from the reference
//! `ExecutionEngine`: hook failures are logged but never fail the
//! invocation, and `wait_for_capacity` gives up after 60 seconds rather than
//! blocking forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use crate::error::{KernelError, Result};
use crate::task_queue::TaskId;

const CAPACITY_WAIT_CEILING: Duration = Duration::from_secs(60);

/// Outcome of a single task execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

/// Result of executing a task, persisted verbatim by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub worker_name: String,
    pub status: ExecutionStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time: Duration,
    pub metadata: serde_json::Value,
    pub completed_at: DateTime<Utc>,
}

/// Rolling execution statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executed: u64,
    pub successful: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub avg_execution_time_ms: f64,
    pub current_load: usize,
}

impl ExecutionStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_executed == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_executed as f64
        }
    }

    pub fn capacity_utilization(&self, max_concurrent: usize) -> f64 {
        if max_concurrent == 0 {
            0.0
        } else {
            self.current_load as f64 / max_concurrent as f64
        }
    }
}

/// A fallible, non-fatal hook run before or after a task executes.
pub type Hook = Arc<dyn Fn(&TaskId) + Send + Sync>;

struct Inner {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    running: DashMap<TaskId, AbortHandle>,
    stats: std::sync::Mutex<ExecutionStats>,
    pre_hooks: std::sync::Mutex<Vec<Hook>>,
    post_hooks: std::sync::Mutex<Vec<Hook>>,
}

/// Bounded-concurrency executor for worker task invocations.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<Inner>,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                running: DashMap::new(),
                stats: std::sync::Mutex::new(ExecutionStats::default()),
                pre_hooks: std::sync::Mutex::new(Vec::new()),
                post_hooks: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn add_pre_execution_hook(&self, hook: Hook) {
        self.inner.pre_hooks.lock().expect("hook mutex poisoned").push(hook);
    }

    pub fn add_post_execution_hook(&self, hook: Hook) {
        self.inner.post_hooks.lock().expect("hook mutex poisoned").push(hook);
    }

    fn run_hooks(hooks: &std::sync::Mutex<Vec<Hook>>, task_id: &TaskId) {
        for hook in hooks.lock().expect("hook mutex poisoned").iter() {
            // Hooks are synchronous callbacks; a panic inside one is caught so
            // it never aborts the execution it's observing.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(task_id)));
            if result.is_err() {
                tracing::warn!(task_id = %task_id, "execution hook panicked");
            }
        }
    }

    /// Execute `worker_call` under a global concurrency permit, optionally
    /// bounded by `timeout`. `worker_call` is a future factory so that the
    /// permit is held only while it actually runs.
    pub async fn execute<F, Fut>(
        &self,
        task_id: TaskId,
        worker_name: impl Into<String>,
        timeout: Option<Duration>,
        worker_call: F,
    ) -> TaskResult
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<serde_json::Value, String>> + Send + 'static,
    {
        let worker_name = worker_name.into();
        let _permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .expect("semaphore never closes");

        {
            let mut stats = self.inner.stats.lock().expect("stats mutex poisoned");
            stats.current_load += 1;
        }

        Self::run_hooks(&self.inner.pre_hooks, &task_id);

        let started = Instant::now();
        let fut = worker_call();
        let handle = tokio::spawn(fut);
        self.inner.running.insert(task_id.clone(), handle.abort_handle());

        let outcome = match timeout {
            Some(dur) => match tokio::time::timeout(dur, handle).await {
                Ok(join_result) => join_result,
                Err(_elapsed) => {
                    self.inner.running.remove(&task_id);
                    let elapsed = started.elapsed();
                    self.record_terminal(ExecutionStatus::Timeout, elapsed);
                    Self::run_hooks(&self.inner.post_hooks, &task_id);
                    return TaskResult {
                        task_id,
                        worker_name,
                        status: ExecutionStatus::Timeout,
                        result: None,
                        error: Some(format!("execution exceeded timeout of {dur:?}")),
                        execution_time: elapsed,
                        metadata: serde_json::Value::Null,
                        completed_at: Utc::now(),
                    };
                }
            },
            None => handle.await,
        };

        self.inner.running.remove(&task_id);
        let elapsed = started.elapsed();

        let (status, result, error) = match outcome {
            Ok(Ok(value)) => (ExecutionStatus::Success, Some(value), None),
            Ok(Err(reason)) => (ExecutionStatus::Error, None, Some(reason)),
            Err(join_err) if join_err.is_cancelled() => {
                (ExecutionStatus::Error, None, Some("execution was cancelled".to_string()))
            }
            Err(join_err) => (ExecutionStatus::Error, None, Some(join_err.to_string())),
        };

        self.record_terminal(status, elapsed);
        Self::run_hooks(&self.inner.post_hooks, &task_id);

        TaskResult {
            task_id,
            worker_name,
            status,
            result,
            error,
            execution_time: elapsed,
            metadata: serde_json::Value::Null,
            completed_at: Utc::now(),
        }
    }

    fn record_terminal(&self, status: ExecutionStatus, elapsed: Duration) {
        let mut stats = self.inner.stats.lock().expect("stats mutex poisoned");
        stats.current_load = stats.current_load.saturating_sub(1);
        stats.total_executed += 1;
        match status {
            ExecutionStatus::Success => stats.successful += 1,
            ExecutionStatus::Error => stats.failed += 1,
            ExecutionStatus::Timeout => stats.timed_out += 1,
        }
        let n = stats.total_executed as f64;
        let ms = elapsed.as_secs_f64() * 1000.0;
        stats.avg_execution_time_ms = (stats.avg_execution_time_ms * (n - 1.0) + ms) / n;
    }

    /// Best-effort cancellation of an in-flight execution.
    pub fn cancel(&self, task_id: &TaskId) -> Result<()> {
        match self.inner.running.get(task_id) {
            Some(handle) => {
                handle.abort();
                Ok(())
            }
            None => Err(KernelError::NotRunning {
                task_id: task_id.clone(),
            }),
        }
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.inner.running.contains_key(task_id)
    }

    pub fn running(&self) -> Vec<TaskId> {
        self.inner.running.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> ExecutionStats {
        self.inner.stats.lock().expect("stats mutex poisoned").clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Block until at least `slots` permits would be available, or give up
    /// after a 60-second ceiling.
    pub async fn wait_for_capacity(&self, slots: usize) -> bool {
        let deadline = Instant::now() + CAPACITY_WAIT_CEILING;
        loop {
            let load = self.inner.stats.lock().expect("stats mutex poisoned").current_load;
            if load + slots <= self.inner.max_concurrent {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Run `calls` concurrently under the engine's global permit, additionally
/// bounded by `per_batch_cap` concurrent calls from this batch alone
/// (defaults to the batch size, i.e. no secondary bound). Returns one
/// `TaskResult` per input, in input order; a call whose outer task panics
/// (distinct from the worker call itself failing, which `execute` already
/// turns into an error result) is reflected as an error result rather than
/// shortening the output.
pub async fn execute_batch(
    engine: &ExecutionEngine,
    calls: Vec<(TaskId, String, Option<Duration>)>,
    per_batch_cap: Option<usize>,
    mut call_fn: impl FnMut(&TaskId) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<serde_json::Value, String>> + Send>>,
) -> Vec<TaskResult> {
    let cap = per_batch_cap.unwrap_or(calls.len().max(1));
    let semaphore = Arc::new(Semaphore::new(cap));
    let mut handles = Vec::with_capacity(calls.len());

    for (task_id, worker_name, timeout) in calls {
        let fut = call_fn(&task_id);
        let engine = engine.clone();
        let semaphore = Arc::clone(&semaphore);
        let task_id_for_error = task_id.clone();
        let worker_name_for_error = worker_name.clone();
        handles.push((
            task_id_for_error,
            worker_name_for_error,
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
                engine.execute(task_id, worker_name, timeout, || fut).await
            }),
        ));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (task_id, worker_name, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                tracing::warn!(%join_err, "execute_batch call panicked");
                TaskResult {
                    task_id,
                    worker_name,
                    status: ExecutionStatus::Error,
                    result: None,
                    error: Some(join_err.to_string()),
                    execution_time: Duration::ZERO,
                    metadata: serde_json::Value::Null,
                    completed_at: Utc::now(),
                }
            }
        };
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn successful_execution_updates_stats() {
        let engine = ExecutionEngine::new(2);
        let result = engine
            .execute(TaskId::new(), "worker-a", None, || async {
                Ok(serde_json::json!({"ok": true}))
            })
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        let stats = engine.stats();
        assert_eq!(stats.total_executed, 1);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.current_load, 0);
    }

    #[tokio::test]
    async fn error_result_is_recorded() {
        let engine = ExecutionEngine::new(1);
        let result = engine
            .execute(TaskId::new(), "worker-a", None, || async { Err("boom".to_string()) })
            .await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let engine = ExecutionEngine::new(1);
        let result = engine
            .execute(TaskId::new(), "worker-a", Some(Duration::from_millis(20)), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(serde_json::Value::Null)
            })
            .await;

        assert_eq!(result.status, ExecutionStatus::Timeout);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let engine = ExecutionEngine::new(2);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = engine.clone();
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                engine
                    .execute(TaskId::new(), "worker-a", None, move || async move {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
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
    async fn wait_for_capacity_succeeds_when_idle() {
        let engine = ExecutionEngine::new(3);
        assert!(engine.wait_for_capacity(2).await);
    }

    #[tokio::test]
    async fn cancel_unknown_task_errors() {
        let engine = ExecutionEngine::new(1);
        let result = engine.cancel(&TaskId::new());
        assert!(matches!(result, Err(KernelError::NotRunning { .. })));
    }

    #[tokio::test]
    async fn execute_batch_preserves_input_order() {
        let engine = ExecutionEngine::new(4);
        let ids: Vec<TaskId> = (0..5).map(|_| TaskId::new()).collect();
        let calls: Vec<_> = ids.iter().map(|id| (id.clone(), "worker-a".to_string(), None)).collect();

        let results = execute_batch(&engine, calls, None, |task_id| {
            let task_id = task_id.clone();
            Box::pin(async move { Ok(serde_json::json!({"id": task_id.to_string()})) })
        })
        .await;

        assert_eq!(results.len(), 5);
        for (expected_id, result) in ids.iter().zip(results.iter()) {
            assert_eq!(&result.task_id, expected_id);
            assert_eq!(result.status, ExecutionStatus::Success);
        }
    }

    #[tokio::test]
    async fn execute_batch_respects_secondary_cap() {
        let engine = ExecutionEngine::new(10);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let calls: Vec<_> = (0..6).map(|_| (TaskId::new(), "worker-a".to_string(), None)).collect();
        let results = execute_batch(&engine, calls, Some(2), |_task_id| {
            let concurrent = Arc::clone(&concurrent);
            let max_seen = Arc::clone(&max_seen);
            Box::pin(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            })
        })
        .await;

        assert_eq!(results.len(), 6);
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
