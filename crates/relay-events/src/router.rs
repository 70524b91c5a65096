//! Real-time event router: four priority-partitioned lock-free queues, one
//! dedicated consumer per lane, retry-with-demotion on handler failure.
//!
//! Built on a lock-free priority scheduler shape (`[SegQueue<_>; 4]` lanes,
//! `DashMap` bookkeeping, `Notify`-driven consumer loops), generalized to
//! four independently-paced consumers, one per priority's minimum service
//! delay, rather than a single best-effort worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::cache::ResultCache;
use crate::error::{EventsError, Result};
use crate::handler::EventHandler;
use crate::model::{CachedEventResult, Event, EventPriority};

const LANES: usize = 4;
const DEFAULT_MAX_RETRIES: u32 = 3;

fn derive_priority(kind: &str, payload: &Value) -> EventPriority {
    if let Some(title) = payload.get("title").and_then(Value::as_str) {
        if title.to_lowercase().contains("urgent") {
            return EventPriority::Critical;
        }
    }
    if let Some(start) = payload.get("meeting_start_time").and_then(Value::as_str) {
        if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(start) {
            let delta = parsed.with_timezone(&Utc) - Utc::now();
            if delta >= chrono::Duration::zero() && delta <= chrono::Duration::hours(1) {
                return EventPriority::Critical;
            }
        }
    }
    match kind {
        "user_feedback" => EventPriority::High,
        "updated_item" | "detected_pattern" => EventPriority::Medium,
        _ => EventPriority::Low,
    }
}

struct RouterInner {
    queues: [SegQueue<Event>; LANES],
    lane_counts: [AtomicUsize; LANES],
    notifies: [Notify; LANES],
    handlers: DashMap<String, Arc<dyn EventHandler>>,
    cache: ResultCache,
    shutdown: AtomicBool,
    max_retries: u32,
}

/// Lock-free, priority-lane event router. Cheaply cloneable (`Arc`-backed).
#[derive(Clone)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl EventRouter {
    pub fn new(cache: ResultCache) -> Self {
        Self::with_max_retries(cache, DEFAULT_MAX_RETRIES)
    }

    /// Same as [`Self::new`] but with a configurable retry bound (spec
    /// §4.8's "under a bound (default 3)") instead of the module default.
    pub fn with_max_retries(cache: ResultCache, max_retries: u32) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                queues: [SegQueue::new(), SegQueue::new(), SegQueue::new(), SegQueue::new()],
                lane_counts: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
                notifies: [Notify::new(), Notify::new(), Notify::new(), Notify::new()],
                handlers: DashMap::new(),
                cache,
                shutdown: AtomicBool::new(false),
                max_retries,
            }),
        }
    }

    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        self.inner.handlers.insert(handler.kind().to_string(), handler);
    }

    /// Submits an event, deriving its initial priority lane from `kind` and
    /// `payload`. Returns the assigned event id, or `QueueFull` if that
    /// lane is at capacity.
    pub fn submit(&self, kind: impl Into<String>, payload: Value, subject: impl Into<String>) -> Result<String> {
        let kind = kind.into();
        let priority = derive_priority(&kind, &payload);
        let submitted_at = Utc::now();
        let id = Event::make_id(&kind, &subject.into(), submitted_at);
        let event = Event { id: id.clone(), kind, priority, payload, retry_count: 0, submitted_at };
        self.enqueue(event)?;
        Ok(id)
    }

    fn enqueue(&self, event: Event) -> Result<()> {
        let lane = event.priority.lane();
        let capacity = event.priority.capacity();
        let current = self.inner.lane_counts[lane].fetch_add(1, Ordering::AcqRel);
        if current >= capacity {
            self.inner.lane_counts[lane].fetch_sub(1, Ordering::AcqRel);
            return Err(EventsError::QueueFull { priority: event.priority, capacity });
        }
        self.inner.queues[lane].push(event);
        self.inner.notifies[lane].notify_one();
        Ok(())
    }

    /// Looks up a cached result for a previously-submitted event id.
    pub async fn result(&self, event_id: &str) -> Option<CachedEventResult> {
        self.inner.cache.get(event_id).await
    }

    /// Spawns one consumer task per priority lane and returns their handles.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        (0..LANES).map(|lane| {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { Self::consumer_loop(inner, lane).await })
        }).collect()
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        for notify in &self.inner.notifies {
            notify.notify_waiters();
        }
    }

    async fn consumer_loop(inner: Arc<RouterInner>, lane: usize) {
        let priority = match lane {
            0 => EventPriority::Critical,
            1 => EventPriority::High,
            2 => EventPriority::Medium,
            _ => EventPriority::Low,
        };
        loop {
            match inner.queues[lane].pop() {
                Some(event) => {
                    inner.lane_counts[lane].fetch_sub(1, Ordering::AcqRel);
                    let elapsed = (Utc::now() - event.submitted_at).to_std().unwrap_or(Duration::ZERO);
                    let min_delay = priority.min_delay();
                    if elapsed < min_delay {
                        tokio::time::sleep(min_delay - elapsed).await;
                    }
                    Self::dispatch(&inner, event).await;
                }
                None => {
                    if inner.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    inner.notifies[lane].notified().await;
                }
            }
        }
    }

    async fn dispatch(inner: &Arc<RouterInner>, event: Event) {
        let Some(handler) = inner.handlers.get(&event.kind).map(|h| Arc::clone(h.value())) else {
            tracing::warn!(event_id = %event.id, kind = %event.kind, "no handler registered");
            inner.cache.insert(CachedEventResult {
                event_id: event.id.clone(),
                kind: event.kind.clone(),
                success: false,
                result: None,
                processing_duration: Duration::ZERO,
                timestamp: Utc::now(),
                error: Some(format!("no handler registered for kind '{}'", event.kind)),
            }).await;
            return;
        };

        let started = Instant::now();
        let outcome = handler.handle(&event).await;
        let processing_duration = started.elapsed();

        match outcome {
            Ok(result) => {
                tracing::debug!(event_id = %event.id, kind = %event.kind, "event processed");
                inner.cache.insert(CachedEventResult {
                    event_id: event.id.clone(),
                    kind: event.kind.clone(),
                    success: true,
                    result: Some(result),
                    processing_duration,
                    timestamp: Utc::now(),
                    error: None,
                }).await;
            }
            Err(error) => {
                let attempts = event.retry_count + 1;
                if attempts < inner.max_retries {
                    tracing::warn!(event_id = %event.id, kind = %event.kind, attempts, %error, "event handler failed, retrying at lower priority");
                    let mut retried = event.clone();
                    retried.retry_count = attempts;
                    retried.priority = retried.priority.demote();
                    retried.submitted_at = Utc::now();
                    let lane = retried.priority.lane();
                    let capacity = retried.priority.capacity();
                    let current = inner.lane_counts[lane].fetch_add(1, Ordering::AcqRel);
                    if current >= capacity {
                        inner.lane_counts[lane].fetch_sub(1, Ordering::AcqRel);
                        tracing::error!(event_id = %event.id, "demoted lane full, dropping event");
                        inner.cache.insert(CachedEventResult {
                            event_id: event.id.clone(),
                            kind: event.kind.clone(),
                            success: false,
                            result: None,
                            processing_duration,
                            timestamp: Utc::now(),
                            error: Some(format!("retry queue full: {error}")),
                        }).await;
                    } else {
                        inner.queues[lane].push(retried);
                        inner.notifies[lane].notify_one();
                    }
                } else {
                    tracing::error!(event_id = %event.id, kind = %event.kind, %error, "event permanently failed");
                    inner.cache.insert(CachedEventResult {
                        event_id: event.id.clone(),
                        kind: event.kind.clone(),
                        success: false,
                        result: None,
                        processing_duration,
                        timestamp: Utc::now(),
                        error: Some(error),
                    }).await;
                }
            }
        }
    }
}
