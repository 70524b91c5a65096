//! Proactive task generation.
//!
//! When `proactive_mode` is enabled, the [`ProactiveScheduler`] fires
//! recurring jobs on cron schedules, emitting [`ProactiveFire`] events that
//! the orchestrator turns into freshly enqueued tasks. Cron parsing and the
//! fire loop follow the same normalize-then-parse, poll-every-second shape
//! used elsewhere in this runtime's scheduling code.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

use crate::error::{AgentError, Result};

/// A recurring job that generates a task of `task_kind` with `payload` each
/// time its cron schedule fires.
#[derive(Debug, Clone)]
pub struct ProactiveJob {
    pub id: String,
    pub task_kind: String,
    pub payload: Value,
    schedule: cron::Schedule,
    enabled: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
}

/// Emitted when a proactive job's schedule fires.
#[derive(Debug, Clone)]
pub struct ProactiveFire {
    pub job_id: String,
    pub task_kind: String,
    pub payload: Value,
    pub fired_at: DateTime<Utc>,
}

fn normalize_cron_expr(expr: &str) -> String {
    let field_count = expr.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    let normalized = normalize_cron_expr(expr);
    cron::Schedule::from_str(&normalized).map_err(|e| AgentError::InvalidCronExpression {
        expression: expr.to_string(),
        reason: e.to_string(),
    })
}

fn next_run_after(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Background scheduler that polls registered jobs once a second and emits
/// a [`ProactiveFire`] for every job that is due.
pub struct ProactiveScheduler {
    jobs: Arc<RwLock<Vec<ProactiveJob>>>,
    running: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ProactiveScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Register a recurring job. `cron_expr` accepts standard 5-field or
    /// 6/7-field (with seconds) syntax.
    pub async fn add_job(
        &self,
        id: impl Into<String>,
        cron_expr: &str,
        task_kind: impl Into<String>,
        payload: Value,
    ) -> Result<()> {
        let id = id.into();
        let task_kind = task_kind.into();
        let schedule = parse_schedule(cron_expr)?;
        let now = Utc::now();
        let next = next_run_after(&schedule, now);

        info!(job_id = %id, task_kind = %task_kind, cron = %cron_expr, "registering proactive job");

        self.jobs.write().await.push(ProactiveJob {
            id,
            task_kind,
            payload,
            schedule,
            enabled: true,
            last_run: None,
            next_run: next,
        });
        Ok(())
    }

    pub async fn list_jobs(&self) -> Vec<ProactiveJob> {
        self.jobs.read().await.clone()
    }

    pub async fn disable_job(&self, id: &str) {
        if let Some(job) = self.jobs.write().await.iter_mut().find(|j| j.id == id) {
            job.enabled = false;
        }
    }

    /// Start the background polling loop, sending a [`ProactiveFire`] through
    /// `tx` for every job that comes due.
    pub fn start(&mut self, tx: mpsc::UnboundedSender<ProactiveFire>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let running = Arc::clone(&self.running);
        let jobs = Arc::clone(&self.jobs);

        let handle = tokio::spawn(async move {
            info!("proactive scheduler started");
            while running.load(Ordering::SeqCst) {
                let now = Utc::now();
                {
                    let mut job_list = jobs.write().await;
                    for job in job_list.iter_mut() {
                        if !job.enabled {
                            continue;
                        }
                        let due = job.next_run.is_some_and(|next| next <= now);
                        if !due {
                            continue;
                        }

                        let fire = ProactiveFire {
                            job_id: job.id.clone(),
                            task_kind: job.task_kind.clone(),
                            payload: job.payload.clone(),
                            fired_at: now,
                        };
                        debug!(job_id = %job.id, "proactive job fired");
                        if tx.send(fire).is_err() {
                            error!(job_id = %job.id, "proactive fire channel closed");
                        }

                        job.last_run = Some(now);
                        job.next_run = next_run_after(&job.schedule, now);
                    }
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            info!("proactive scheduler stopped");
        });

        self.handle = Some(handle);
    }

    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for ProactiveScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_list_jobs() {
        let scheduler = ProactiveScheduler::new();
        scheduler
            .add_job("daily-digest", "0 8 * * *", "summarize", serde_json::json!({}))
            .await
            .unwrap();
        let jobs = scheduler.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task_kind, "summarize");
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected() {
        let scheduler = ProactiveScheduler::new();
        let result = scheduler
            .add_job("bad", "not a cron", "summarize", serde_json::json!({}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disabled_job_does_not_fire() {
        let scheduler = ProactiveScheduler::new();
        scheduler
            .add_job("fast", "* * * * * *", "tick", serde_json::json!({}))
            .await
            .unwrap();
        scheduler.disable_job("fast").await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = scheduler;
        scheduler.start(tx);

        let fired = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
        scheduler.stop().await;
        assert!(fired.is_err(), "disabled job must not fire");
    }

    #[tokio::test]
    async fn scheduler_fires_event() {
        let scheduler = ProactiveScheduler::new();
        scheduler
            .add_job("fast", "* * * * * *", "tick", serde_json::json!({"n": 1}))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = scheduler;
        scheduler.start(tx);

        let fire = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for proactive fire")
            .expect("channel closed unexpectedly");

        scheduler.stop().await;
        assert_eq!(fire.job_id, "fast");
        assert_eq!(fire.task_kind, "tick");
    }
}
