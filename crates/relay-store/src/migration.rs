//! Schema migration system.
//!
//! Migrations are stored as static SQL strings keyed by version number.
//! The current version is tracked in a `_migrations` table so migrations
//! are idempotent and only run once.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema -- task results, preferences, interactions, context, patterns",
    sql: r#"
        CREATE TABLE task_results (
            task_id        TEXT PRIMARY KEY,
            worker_name    TEXT NOT NULL,
            status         TEXT NOT NULL CHECK(status IN ('success','error','timeout')),
            result         TEXT,
            error          TEXT,
            execution_time REAL,
            metadata       TEXT,
            timestamp      DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX idx_task_results_worker ON task_results(worker_name);
        CREATE INDEX idx_task_results_timestamp ON task_results(timestamp);

        -- Composite key on (preference_key, worker_name): the same (key,
        -- worker) pair replaces the prior value and confidence, not a
        -- key-only upsert.
        CREATE TABLE user_preferences (
            preference_key   TEXT NOT NULL,
            worker_name      TEXT NOT NULL,
            preference_value TEXT NOT NULL,
            learned_at       DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            confidence       REAL NOT NULL DEFAULT 0.5,
            PRIMARY KEY (preference_key, worker_name)
        );
        CREATE INDEX idx_preferences_worker ON user_preferences(worker_name);

        CREATE TABLE agent_interactions (
            interaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_worker    TEXT NOT NULL,
            to_worker      TEXT NOT NULL,
            message        TEXT NOT NULL,
            response       TEXT,
            timestamp      DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX idx_interactions_from ON agent_interactions(from_worker);
        CREATE INDEX idx_interactions_to ON agent_interactions(to_worker);

        CREATE TABLE context_memory (
            context_id   INTEGER PRIMARY KEY AUTOINCREMENT,
            worker_name  TEXT NOT NULL,
            context_type TEXT NOT NULL,
            context_data TEXT NOT NULL,
            timestamp    DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            expiry_date  DATETIME NOT NULL
        );
        CREATE INDEX idx_context_worker ON context_memory(worker_name);

        CREATE TABLE learning_patterns (
            pattern_id   INTEGER PRIMARY KEY AUTOINCREMENT,
            worker_name  TEXT NOT NULL,
            pattern_type TEXT NOT NULL,
            pattern_data TEXT NOT NULL,
            frequency    INTEGER NOT NULL DEFAULT 1,
            success_rate REAL NOT NULL DEFAULT 0.0,
            last_updated DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(worker_name, pattern_type)
        );
    "#,
}];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function -- call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    info!(
        new_version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "all migrations applied"
    );
    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })?;
    Ok(version)
}

// ── internals ────────────────────────────────────────────────────────

/// Create the `_migrations` bookkeeping table if it does not exist.
fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })?;
    Ok(())
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // We cannot use `conn.transaction()` because that requires `&mut Connection`,
    // so we manage the transaction manually.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to begin transaction: {e}"),
        })?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: format!("failed to commit: {e}"),
                })?;
            info!(
                version = migration.version,
                "migration applied successfully"
            );
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    const LATEST_VERSION: u32 = 1;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[1].version > window[0].version);
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
                )
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };

        for expected in [
            "task_results",
            "user_preferences",
            "agent_interactions",
            "context_memory",
            "learning_patterns",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {expected}");
        }
    }

    #[test]
    fn preferences_composite_key_allows_same_key_different_worker() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO user_preferences (preference_key, worker_name, preference_value) VALUES ('tone', 'communication', 'formal')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO user_preferences (preference_key, worker_name, preference_value) VALUES ('tone', 'research', 'casual')",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM user_preferences WHERE preference_key = 'tone'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
