//! Row-level persistence for models and jobs.
//!
//! Rows hold plain strings, JSON text and millisecond timestamps; callers
//! own the conversion to their domain types. The connection sits behind a
//! `std::sync::Mutex` and every call is a short synchronous statement.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, Row};
use thiserror::Error;

use crate::cas::{CasError, CasStore};
use crate::schema;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blob store error: {0}")]
    Cas(#[from] CasError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRow {
    pub model_id: String,
    pub model_type: String,
    pub hyperparameters: String,
    pub metrics: String,
    pub encoder_hash: String,
    pub model_hash: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub job_id: String,
    pub model_type: String,
    pub hyperparameters: String,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
}

pub struct Store {
    conn: Mutex<Connection>,
    cas: CasStore,
}

impl Store {
    /// Open `<data_dir>/sqlite/matchcast.db` and `<data_dir>/objects`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let conn = schema::open_db(&data_dir.join("sqlite").join("matchcast.db"))?;
        let cas = CasStore::open(data_dir)?;
        tracing::info!(data_dir = %data_dir.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            cas,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn put_blob(&self, data: &[u8]) -> Result<String> {
        Ok(self.cas.put_bytes(data)?)
    }

    pub fn get_blob(&self, hash: &str) -> Result<Vec<u8>> {
        Ok(self.cas.get_bytes(hash)?)
    }

    /// Insert or replace a model row. A replaced row keeps its position in
    /// [`Store::load_models`] order.
    pub fn save_model(&self, row: &ModelRow) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO models
                (model_id, model_type, hyperparameters, metrics, encoder_hash, model_hash, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(model_id) DO UPDATE SET
                model_type = excluded.model_type,
                hyperparameters = excluded.hyperparameters,
                metrics = excluded.metrics,
                encoder_hash = excluded.encoder_hash,
                model_hash = excluded.model_hash,
                created_at_ms = excluded.created_at_ms",
            params![
                row.model_id,
                row.model_type,
                row.hyperparameters,
                row.metrics,
                row.encoder_hash,
                row.model_hash,
                row.created_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn load_models(&self) -> Result<Vec<ModelRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT model_id, model_type, hyperparameters, metrics, encoder_hash, model_hash, created_at_ms
             FROM models ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ModelRow {
                    model_id: row.get(0)?,
                    model_type: row.get(1)?,
                    hyperparameters: row.get(2)?,
                    metrics: row.get(3)?,
                    encoder_hash: row.get(4)?,
                    model_hash: row.get(5)?,
                    created_at_ms: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn save_job(&self, row: &JobRow) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO jobs
                (job_id, model_type, hyperparameters, status, error_message,
                 created_at_ms, started_at_ms, finished_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.job_id,
                row.model_type,
                row.hyperparameters,
                row.status,
                row.error_message,
                row.created_at_ms,
                row.started_at_ms,
                row.finished_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn load_jobs(&self) -> Result<Vec<JobRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{JOB_SELECT} ORDER BY created_at_ms, job_id"))?;
        let rows = stmt
            .query_map([], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

const JOB_SELECT: &str = "SELECT job_id, model_type, hyperparameters, status, error_message,
        created_at_ms, started_at_ms, finished_at_ms FROM jobs";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        job_id: row.get(0)?,
        model_type: row.get(1)?,
        hyperparameters: row.get(2)?,
        status: row.get(3)?,
        error_message: row.get(4)?,
        created_at_ms: row.get(5)?,
        started_at_ms: row.get(6)?,
        finished_at_ms: row.get(7)?,
    })
}
