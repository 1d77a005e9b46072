//! Database schema definitions.

use rusqlite::Connection;
use tracing::info;

use rapid_storage::StorageError;

/// Current schema version for migrations.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("creating rapid response schema v{}", SCHEMA_VERSION);
        conn.execute_batch(TABLES_SCHEMA)
            .map_err(|e| StorageError::Backend(format!("failed to create tables: {e}")))?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(StorageError::Backend(format!(
            "database schema v{current_version} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32, StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| StorageError::Backend(format!("failed to create schema_version table: {e}")))?;

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| StorageError::Backend(format!("failed to read schema_version: {e}")))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| StorageError::Backend(format!("failed to clear schema_version: {e}")))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| StorageError::Backend(format!("failed to set schema_version: {e}")))?;
    Ok(())
}

/// Runs, submissions, and per-problem settings.
///
/// `runs_single_open` is a partial unique index: it admits any number of
/// closed runs per (problem, context) but at most one with `open = 1`.
const TABLES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    problem_id  TEXT NOT NULL,
    context_id  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    open        INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS runs_problem_context
    ON runs (problem_id, context_id, created_at);

CREATE UNIQUE INDEX IF NOT EXISTS runs_single_open
    ON runs (problem_id, context_id) WHERE open = 1;

CREATE TABLE IF NOT EXISTS submissions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          INTEGER NOT NULL REFERENCES runs (id),
    participant_id  TEXT NOT NULL,
    answer_id       TEXT NOT NULL,
    answer_text     TEXT NOT NULL,
    event           TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE (run_id, participant_id)
);

CREATE INDEX IF NOT EXISTS submissions_run_answer
    ON submissions (run_id, answer_id);

CREATE TABLE IF NOT EXISTS problem_settings (
    problem_id  TEXT PRIMARY KEY,
    enabled     INTEGER NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;
