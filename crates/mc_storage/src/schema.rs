//! SQLite schema for model and job records.

use std::path::Path;

use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS models (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            model_id        TEXT NOT NULL UNIQUE,
            model_type      TEXT NOT NULL,
            hyperparameters TEXT NOT NULL DEFAULT '{}',
            metrics         TEXT NOT NULL DEFAULT '{}',
            encoder_hash    TEXT NOT NULL,
            model_hash      TEXT NOT NULL,
            created_at_ms   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS jobs (
            job_id          TEXT PRIMARY KEY,
            model_type      TEXT NOT NULL,
            hyperparameters TEXT NOT NULL DEFAULT '{}',
            status          TEXT NOT NULL,
            error_message   TEXT,
            created_at_ms   INTEGER NOT NULL,
            started_at_ms   INTEGER,
            finished_at_ms  INTEGER
        );
        ",
    )
}

/// Open (creating directories as needed) a WAL-mode database with the schema applied.
pub fn open_db(path: &Path) -> crate::store::Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "database opened");
    create_schema(&conn)?;
    Ok(conn)
}
