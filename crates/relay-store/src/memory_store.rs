//! Durable memory store: task history, learned preferences, context, and
//! learning patterns.
//!
//! Backed by a single SQLite database (see [`migration`](crate::migration)
//! for the schema). All methods are async and dispatch onto the blocking
//! thread pool through [`Database::execute`]/[`Database::execute_mut`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// A recorded task outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResultRecord {
    pub task_id: String,
    pub worker_name: String,
    pub status: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time: Option<f64>,
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// A learned user preference, scoped to a single worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferenceEntry {
    pub preference_key: String,
    pub worker_name: String,
    pub preference_value: Value,
    pub learned_at: DateTime<Utc>,
    pub confidence: f64,
}

/// An entry in the time-bounded context scratchpad.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub context_id: i64,
    pub worker_name: String,
    pub context_type: String,
    pub context_data: Value,
    pub timestamp: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
}

/// A detected behavioral pattern, with a moving-average success rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningPattern {
    pub pattern_id: i64,
    pub worker_name: String,
    pub pattern_type: String,
    pub pattern_data: Value,
    pub frequency: i64,
    pub success_rate: f64,
    pub last_updated: DateTime<Utc>,
}

/// Aggregate collaboration statistics for a single worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollaborationInsights {
    pub worker_name: String,
    pub messages_sent: i64,
    pub messages_received: i64,
    pub responses_given: i64,
    pub task_success_rate: f64,
    pub total_tasks: i64,
}

/// Durable, queryable memory for the agent runtime.
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    /// Wrap an already-open, migrated [`Database`].
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open and migrate a database at `path`, returning a ready store.
    pub async fn open(path: impl AsRef<std::path::Path> + Send + 'static) -> StoreResult<Self> {
        let db = Database::open_and_migrate(path).await?;
        Ok(Self::new(db))
    }

    /// Initialize worker-scoped bookkeeping: if `worker_name` has no context
    /// entries yet, insert a long-lived `"initialization"` marker so the
    /// worker's presence in `context_memory` can be distinguished from one
    /// that has simply never been seen.
    pub async fn init(&self, worker_name: impl Into<String>) -> StoreResult<()> {
        let worker_name = worker_name.into();
        self.db
            .execute_mut(move |conn| {
                let existing: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM context_memory WHERE worker_name = ?1",
                    params![worker_name],
                    |row| row.get(0),
                )?;
                if existing == 0 {
                    let data = serde_json::to_string(&serde_json::json!({"initialized": true}))?;
                    let expiry = (Utc::now() + ChronoDuration::days(365)).to_rfc3339();
                    conn.execute(
                        "INSERT INTO context_memory (worker_name, context_type, context_data, expiry_date)
                         VALUES (?1, 'initialization', ?2, ?3)",
                        params![worker_name, data, expiry],
                    )?;
                }
                Ok(())
            })
            .await
    }

    // ── task results ─────────────────────────────────────────────────

    /// Record a task's outcome and fold it into the worker's learning
    /// pattern for `"task_execution"`, updated as an incremental (online)
    /// average: `rate' = rate + (is_success - rate) / frequency'`.
    pub async fn record_result(
        &self,
        task_id: impl Into<String>,
        worker_name: impl Into<String>,
        status: impl Into<String>,
        result: Option<Value>,
        error: Option<String>,
        execution_time: Option<f64>,
        metadata: Option<Value>,
    ) -> StoreResult<()> {
        let task_id = task_id.into();
        let worker_name = worker_name.into();
        let status = status.into();
        let is_success = status == "success";

        let result_json = json_opt(&result)?;
        let metadata_json = json_opt(&metadata)?;

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                tx.execute(
                    "INSERT INTO task_results
                        (task_id, worker_name, status, result, error, execution_time, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(task_id) DO UPDATE SET
                        worker_name = excluded.worker_name,
                        status = excluded.status,
                        result = excluded.result,
                        error = excluded.error,
                        execution_time = excluded.execution_time,
                        metadata = excluded.metadata,
                        timestamp = CURRENT_TIMESTAMP",
                    params![
                        task_id,
                        worker_name,
                        status,
                        result_json,
                        error,
                        execution_time,
                        metadata_json
                    ],
                )?;

                let existing: Option<(i64, f64)> = tx
                    .query_row(
                        "SELECT frequency, success_rate FROM learning_patterns
                         WHERE worker_name = ?1 AND pattern_type = 'task_execution'",
                        params![worker_name],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let success_f = if is_success { 1.0 } else { 0.0 };
                let (new_frequency, new_rate) = match existing {
                    Some((frequency, rate)) => {
                        let frequency = frequency + 1;
                        let rate = rate + (success_f - rate) / frequency as f64;
                        (frequency, rate)
                    }
                    None => (1, success_f),
                };

                tx.execute(
                    "INSERT INTO learning_patterns
                        (worker_name, pattern_type, pattern_data, frequency, success_rate, last_updated)
                     VALUES (?1, 'task_execution', '{}', ?2, ?3, CURRENT_TIMESTAMP)
                     ON CONFLICT(worker_name, pattern_type) DO UPDATE SET
                        frequency = excluded.frequency,
                        success_rate = excluded.success_rate,
                        last_updated = CURRENT_TIMESTAMP",
                    params![worker_name, new_frequency, new_rate],
                )?;

                tx.commit()?;
                Ok(())
            })
            .await?;

        debug!(task_id = %task_id, worker_name = %worker_name, status = %status, "recorded task result");
        Ok(())
    }

    /// Return task results for `worker_name` (or all workers if `None`),
    /// newest first, capped at `limit`.
    pub async fn task_history(
        &self,
        worker_name: Option<String>,
        limit: usize,
    ) -> StoreResult<Vec<TaskResultRecord>> {
        self.db
            .execute(move |conn| {
                let mut rows = Vec::new();
                let mut push = |r: rusqlite::Result<TaskResultRecord>| -> StoreResult<()> {
                    rows.push(r?);
                    Ok(())
                };

                if let Some(worker_name) = &worker_name {
                    let mut stmt = conn.prepare(
                        "SELECT task_id, worker_name, status, result, error, execution_time, metadata, timestamp
                         FROM task_results WHERE worker_name = ?1
                         ORDER BY timestamp DESC LIMIT ?2",
                    )?;
                    let mapped = stmt.query_map(params![worker_name, limit as i64], row_to_task_result)?;
                    for r in mapped {
                        push(r)?;
                    }
                } else {
                    let mut stmt = conn.prepare(
                        "SELECT task_id, worker_name, status, result, error, execution_time, metadata, timestamp
                         FROM task_results ORDER BY timestamp DESC LIMIT ?1",
                    )?;
                    let mapped = stmt.query_map(params![limit as i64], row_to_task_result)?;
                    for r in mapped {
                        push(r)?;
                    }
                }
                Ok(rows)
            })
            .await
    }

    // ── preferences ──────────────────────────────────────────────────

    /// Learn (or update) a preference, scoped to `(preference_key, worker_name)`.
    pub async fn put_preference(
        &self,
        preference_key: impl Into<String>,
        worker_name: impl Into<String>,
        value: Value,
        confidence: f64,
    ) -> StoreResult<()> {
        let preference_key = preference_key.into();
        let worker_name = worker_name.into();
        let value_json = serde_json::to_string(&value)?;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO user_preferences
                        (preference_key, worker_name, preference_value, confidence, learned_at)
                     VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
                     ON CONFLICT(preference_key, worker_name) DO UPDATE SET
                        preference_value = excluded.preference_value,
                        confidence = excluded.confidence,
                        learned_at = CURRENT_TIMESTAMP",
                    params![preference_key, worker_name, value_json, confidence],
                )?;
                Ok(())
            })
            .await
    }

    /// Fetch preferences, optionally scoped to a single worker.
    pub async fn get_preferences(
        &self,
        worker_name: Option<String>,
    ) -> StoreResult<Vec<PreferenceEntry>> {
        self.db
            .execute(move |conn| {
                let mut rows = Vec::new();
                if let Some(worker_name) = &worker_name {
                    let mut stmt = conn.prepare(
                        "SELECT preference_key, worker_name, preference_value, learned_at, confidence
                         FROM user_preferences WHERE worker_name = ?1 ORDER BY confidence DESC",
                    )?;
                    for r in stmt.query_map(params![worker_name], row_to_preference)? {
                        rows.push(r?);
                    }
                } else {
                    let mut stmt = conn.prepare(
                        "SELECT preference_key, worker_name, preference_value, learned_at, confidence
                         FROM user_preferences ORDER BY confidence DESC",
                    )?;
                    for r in stmt.query_map([], row_to_preference)? {
                        rows.push(r?);
                    }
                }
                Ok(rows)
            })
            .await
    }

    // ── context ──────────────────────────────────────────────────────

    /// Store a context entry that expires after `ttl_hours` hours.
    pub async fn put_context(
        &self,
        worker_name: impl Into<String>,
        context_type: impl Into<String>,
        data: Value,
        ttl_hours: i64,
    ) -> StoreResult<i64> {
        let worker_name = worker_name.into();
        let context_type = context_type.into();
        let data_json = serde_json::to_string(&data)?;
        let expiry = (Utc::now() + ChronoDuration::hours(ttl_hours)).to_rfc3339();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO context_memory (worker_name, context_type, context_data, expiry_date)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![worker_name, context_type, data_json, expiry],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    /// Evict expired entries, then return live context for `worker_name`
    /// (optionally filtered to a single `context_type`).
    pub async fn get_context(
        &self,
        worker_name: impl Into<String>,
        context_type: Option<String>,
    ) -> StoreResult<Vec<ContextEntry>> {
        let worker_name = worker_name.into();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM context_memory WHERE expiry_date < CURRENT_TIMESTAMP",
                    [],
                )?;

                let mut rows = Vec::new();
                if let Some(context_type) = &context_type {
                    let mut stmt = conn.prepare(
                        "SELECT context_id, worker_name, context_type, context_data, timestamp, expiry_date
                         FROM context_memory WHERE worker_name = ?1 AND context_type = ?2
                         ORDER BY timestamp DESC",
                    )?;
                    for r in stmt.query_map(params![worker_name, context_type], row_to_context)? {
                        rows.push(r?);
                    }
                } else {
                    let mut stmt = conn.prepare(
                        "SELECT context_id, worker_name, context_type, context_data, timestamp, expiry_date
                         FROM context_memory WHERE worker_name = ?1 ORDER BY timestamp DESC",
                    )?;
                    for r in stmt.query_map(params![worker_name], row_to_context)? {
                        rows.push(r?);
                    }
                }
                Ok(rows)
            })
            .await
    }

    // ── learning patterns ────────────────────────────────────────────

    /// Patterns with `frequency >= min_frequency` (default 2), optionally
    /// scoped to one worker.
    pub async fn patterns(
        &self,
        worker_name: Option<String>,
        min_frequency: i64,
    ) -> StoreResult<Vec<LearningPattern>> {
        self.db
            .execute(move |conn| {
                let mut rows = Vec::new();
                if let Some(worker_name) = &worker_name {
                    let mut stmt = conn.prepare(
                        "SELECT pattern_id, worker_name, pattern_type, pattern_data, frequency, success_rate, last_updated
                         FROM learning_patterns WHERE worker_name = ?1 AND frequency >= ?2
                         ORDER BY success_rate DESC, frequency DESC",
                    )?;
                    for r in stmt.query_map(params![worker_name, min_frequency], row_to_pattern)? {
                        rows.push(r?);
                    }
                } else {
                    let mut stmt = conn.prepare(
                        "SELECT pattern_id, worker_name, pattern_type, pattern_data, frequency, success_rate, last_updated
                         FROM learning_patterns WHERE frequency >= ?1
                         ORDER BY success_rate DESC, frequency DESC",
                    )?;
                    for r in stmt.query_map(params![min_frequency], row_to_pattern)? {
                        rows.push(r?);
                    }
                }
                Ok(rows)
            })
            .await
    }

    /// Same as [`Self::patterns`] with the default `min_frequency` of 2.
    pub async fn patterns_default(&self, worker_name: Option<String>) -> StoreResult<Vec<LearningPattern>> {
        self.patterns(worker_name, 2).await
    }

    // ── interactions ─────────────────────────────────────────────────

    /// Record a message exchanged between two workers.
    pub async fn record_interaction(
        &self,
        from_worker: impl Into<String>,
        to_worker: impl Into<String>,
        message: impl Into<String>,
        response: Option<String>,
    ) -> StoreResult<i64> {
        let from_worker = from_worker.into();
        let to_worker = to_worker.into();
        let message = message.into();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO agent_interactions (from_worker, to_worker, message, response)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![from_worker, to_worker, message, response],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    /// Aggregate interaction and task-success statistics for `worker_name`.
    pub async fn collaboration_insights(
        &self,
        worker_name: impl Into<String>,
    ) -> StoreResult<CollaborationInsights> {
        let worker_name = worker_name.into();
        self.db
            .execute(move |conn| {
                let messages_sent: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM agent_interactions WHERE from_worker = ?1",
                    params![worker_name],
                    |row| row.get(0),
                )?;
                let messages_received: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM agent_interactions WHERE to_worker = ?1",
                    params![worker_name],
                    |row| row.get(0),
                )?;
                let responses_given: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM agent_interactions WHERE to_worker = ?1 AND response IS NOT NULL",
                    params![worker_name],
                    |row| row.get(0),
                )?;
                let total_tasks: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM task_results WHERE worker_name = ?1",
                    params![worker_name],
                    |row| row.get(0),
                )?;
                let successes: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM task_results WHERE worker_name = ?1 AND status = 'success'",
                    params![worker_name],
                    |row| row.get(0),
                )?;
                let task_success_rate = if total_tasks > 0 {
                    successes as f64 / total_tasks as f64
                } else {
                    0.0
                };

                Ok(CollaborationInsights {
                    worker_name: worker_name.clone(),
                    messages_sent,
                    messages_received,
                    responses_given,
                    task_success_rate,
                    total_tasks,
                })
            })
            .await
    }

    // ── retention ────────────────────────────────────────────────────

    /// Delete task results, interactions, and expired context older than
    /// `days` days. Returns the total number of rows removed.
    pub async fn purge_older_than(&self, days: i64) -> StoreResult<u64> {
        let cutoff = (Utc::now() - ChronoDuration::days(days)).to_rfc3339();
        let removed = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let a = tx.execute(
                    "DELETE FROM task_results WHERE timestamp < ?1",
                    params![cutoff],
                )?;
                let b = tx.execute(
                    "DELETE FROM agent_interactions WHERE timestamp < ?1",
                    params![cutoff],
                )?;
                let c = tx.execute(
                    "DELETE FROM context_memory WHERE expiry_date < ?1",
                    params![cutoff],
                )?;
                tx.commit()?;
                Ok((a + b + c) as u64)
            })
            .await?;

        info!(days, removed, "purged aged memory records");
        Ok(removed)
    }

    /// Force a WAL checkpoint, flushing buffered writes to the main database
    /// file. Useful before a clean shutdown.
    pub async fn save_all(&self) -> StoreResult<()> {
        self.db
            .execute(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
    }
}

// ── row mappers ──────────────────────────────────────────────────────

fn json_opt(value: &Option<Value>) -> StoreResult<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

fn parse_json_column(raw: Option<String>) -> rusqlite::Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_task_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskResultRecord> {
    Ok(TaskResultRecord {
        task_id: row.get(0)?,
        worker_name: row.get(1)?,
        status: row.get(2)?,
        result: parse_json_column(row.get(3)?)?,
        error: row.get(4)?,
        execution_time: row.get(5)?,
        metadata: parse_json_column(row.get(6)?)?,
        timestamp: row.get(7)?,
    })
}

fn row_to_preference(row: &rusqlite::Row<'_>) -> rusqlite::Result<PreferenceEntry> {
    let raw_value: String = row.get(2)?;
    let preference_value = serde_json::from_str(&raw_value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(PreferenceEntry {
        preference_key: row.get(0)?,
        worker_name: row.get(1)?,
        preference_value,
        learned_at: row.get(3)?,
        confidence: row.get(4)?,
    })
}

fn row_to_context(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextEntry> {
    let raw_data: String = row.get(3)?;
    let context_data = serde_json::from_str(&raw_data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(ContextEntry {
        context_id: row.get(0)?,
        worker_name: row.get(1)?,
        context_type: row.get(2)?,
        context_data,
        timestamp: row.get(4)?,
        expiry_date: row.get(5)?,
    })
}

fn row_to_pattern(row: &rusqlite::Row<'_>) -> rusqlite::Result<LearningPattern> {
    let raw_data: String = row.get(3)?;
    let pattern_data = serde_json::from_str(&raw_data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(LearningPattern {
        pattern_id: row.get(0)?,
        worker_name: row.get(1)?,
        pattern_type: row.get(2)?,
        pattern_data,
        frequency: row.get(4)?,
        success_rate: row.get(5)?,
        last_updated: row.get(6)?,
    })
}

// ── tests ────────────────────────────────────────────────────────────
