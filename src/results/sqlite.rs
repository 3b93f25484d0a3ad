//! # SQLite-backed result backend.
//!
//! Every terminal record lives in one indexed table:
//! ```sql
//! results(id TEXT PRIMARY KEY, func_name TEXT, status TEXT,
//!         value BLOB, error TEXT, traceback TEXT,
//!         started_at INTEGER, finished_at INTEGER,
//!         attempts BLOB, retries_left INTEGER, created_at INTEGER,
//!         tags TEXT, description TEXT)
//! ```
//! `value` and `attempts` are bincode blobs; `tags` is a JSON array. WAL
//! mode plus a busy timeout tolerate concurrent readers. Inserts use
//! `ON CONFLICT DO NOTHING` so the first terminal write wins.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bincode::config::{self, Configuration};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{BackendError, CodecError};
use crate::job::{Attempt, JobStatus, JobValue};

use super::{JobFilter, JobRecord, ResultBackend};

/// Terminal-record store in a single SQLite database file.
pub struct SqliteResultBackend {
    pool: SqlitePool,
    cfg: Configuration,
}

impl SqliteResultBackend {
    /// Opens (and migrates if needed) a result database at `path`.
    pub async fn connect(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS results (
                id           TEXT PRIMARY KEY,
                func_name    TEXT NOT NULL,
                status       TEXT NOT NULL,
                value        BLOB,
                error        TEXT,
                traceback    TEXT,
                started_at   INTEGER,
                finished_at  INTEGER,
                attempts     BLOB NOT NULL,
                retries_left INTEGER NOT NULL,
                created_at   INTEGER NOT NULL,
                tags         TEXT NOT NULL,
                description  TEXT
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_results_status ON results (status)")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_results_finished ON results (finished_at DESC)",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            cfg: config::standard(),
        })
    }

    async fn store(&self, record: JobRecord) -> Result<(), BackendError> {
        let value = match &record.result {
            Some(v) => Some(bincode::serde::encode_to_vec(v, self.cfg).map_err(|e| {
                BackendError::Codec(CodecError::Unencodable {
                    reason: e.to_string(),
                })
            })?),
            None => None,
        };
        let attempts = bincode::serde::encode_to_vec(&record.attempts, self.cfg).map_err(|e| {
            BackendError::Codec(CodecError::Unencodable {
                reason: e.to_string(),
            })
        })?;
        let tags = serde_json::to_string(&record.tags).map_err(|e| {
            BackendError::Codec(CodecError::Unencodable {
                reason: e.to_string(),
            })
        })?;

        sqlx::query(
            "INSERT INTO results (
                id, func_name, status, value, error, traceback,
                started_at, finished_at, attempts, retries_left, created_at,
                tags, description
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&record.id)
        .bind(&record.func_name)
        .bind(record.status.as_str())
        .bind(value)
        .bind(&record.error)
        .bind(&record.traceback)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(attempts)
        .bind(record.retries_left as i64)
        .bind(record.created_at)
        .bind(tags)
        .bind(&record.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn record_from_row(&self, row: &SqliteRow) -> Result<JobRecord, BackendError> {
        let status_raw: String = row.get("status");
        let status = JobStatus::parse(&status_raw).ok_or_else(|| {
            BackendError::Codec(CodecError::Corrupt {
                reason: format!("unknown status '{status_raw}'"),
            })
        })?;

        let result = match row.get::<Option<Vec<u8>>, _>("value") {
            Some(bytes) => {
                let (value, _): (JobValue, usize) =
                    bincode::serde::decode_from_slice(&bytes, self.cfg).map_err(|e| {
                        BackendError::Codec(CodecError::Corrupt {
                            reason: e.to_string(),
                        })
                    })?;
                Some(value)
            }
            None => None,
        };

        let attempts_bytes: Vec<u8> = row.get("attempts");
        let (attempts, _): (Vec<Attempt>, usize) =
            bincode::serde::decode_from_slice(&attempts_bytes, self.cfg).map_err(|e| {
                BackendError::Codec(CodecError::Corrupt {
                    reason: e.to_string(),
                })
            })?;

        let tags_raw: String = row.get("tags");
        let tags: Vec<String> = serde_json::from_str(&tags_raw).unwrap_or_default();

        Ok(JobRecord {
            id: row.get("id"),
            func_name: row.get("func_name"),
            status,
            result,
            error: row.get("error"),
            traceback: row.get("traceback"),
            attempts,
            retries_left: row.get::<i64, _>("retries_left") as u32,
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            tags,
            description: row.get("description"),
        })
    }

    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>, BackendError> {
        let row = sqlx::query("SELECT * FROM results WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| self.record_from_row(&r)).transpose()
    }
}

#[async_trait]
impl ResultBackend for SqliteResultBackend {
    async fn set_result(&self, record: JobRecord) -> Result<(), BackendError> {
        self.store(record).await
    }

    async fn set_error(&self, record: JobRecord) -> Result<(), BackendError> {
        self.store(record).await
    }

    async fn get_result(&self, id: &str) -> Result<Option<JobValue>, BackendError> {
        Ok(self
            .fetch(id)
            .await?
            .filter(|r| r.status == JobStatus::Success)
            .and_then(|r| r.result))
    }

    async fn get_error(&self, id: &str) -> Result<Option<String>, BackendError> {
        Ok(self
            .fetch(id)
            .await?
            .filter(|r| r.status != JobStatus::Success)
            .and_then(|r| r.error))
    }

    async fn get_full(&self, id: &str) -> Result<Option<JobRecord>, BackendError> {
        self.fetch(id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, BackendError> {
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = match filter.status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM results WHERE status = ?1
                     ORDER BY finished_at DESC LIMIT ?2",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM results ORDER BY finished_at DESC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(|r| self.record_from_row(r)).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
