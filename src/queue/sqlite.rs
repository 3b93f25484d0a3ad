//! # SQLite-backed queue: single-file database with visibility-timeout
//! leasing.
//!
//! One table carries the whole queue:
//! ```sql
//! jobs(id TEXT PRIMARY KEY, payload BLOB, status TEXT,
//!      visible_at INTEGER, lease_expires_at INTEGER, enqueued_at INTEGER)
//! ```
//!
//! A claim is a single `UPDATE ... WHERE id IN (SELECT ...) RETURNING`
//! statement, so concurrent connections can never lease the same row.
//! The database runs in WAL mode with a busy timeout to tolerate
//! concurrent readers; writers are expected to be a single process per
//! database file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::codec::CodecRef;
use crate::error::BackendError;
use crate::job::{now_ms, Job};

use super::QueueBackend;

/// Polling interval while a blocking dequeue waits for work.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Persistent queue stored in a single SQLite database file.
pub struct SqliteQueue {
    pool: SqlitePool,
    codec: CodecRef,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    /// Opens (and migrates if needed) a queue database at `path`.
    pub async fn connect(
        path: &Path,
        codec: CodecRef,
        visibility_timeout: Duration,
    ) -> Result<Self, BackendError> {
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
            "CREATE TABLE IF NOT EXISTS jobs (
                id               TEXT PRIMARY KEY,
                payload          BLOB NOT NULL,
                status           TEXT NOT NULL,
                visible_at       INTEGER NOT NULL,
                lease_expires_at INTEGER,
                enqueued_at      INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_claim
             ON jobs (status, visible_at, enqueued_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            codec,
            visibility_timeout,
        })
    }

    async fn claim(&self, max: usize) -> Result<Vec<Job>, BackendError> {
        let now = now_ms();
        let lease = now + self.visibility_timeout.as_millis() as i64;
        let rows = sqlx::query(
            "UPDATE jobs
             SET status = 'inflight', lease_expires_at = ?1
             WHERE id IN (
                 SELECT id FROM jobs
                 WHERE status = 'pending' AND visible_at <= ?2
                 ORDER BY enqueued_at
                 LIMIT ?3
             )
             RETURNING id, payload",
        )
        .bind(lease)
        .bind(now)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let payload: Vec<u8> = row.get("payload");
            match self.codec.decode(&payload) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    // Park the row out of the claim path instead of looping
                    // on it forever.
                    sqlx::query("UPDATE jobs SET status = 'corrupt' WHERE id = ?1")
                        .bind(&id)
                        .execute(&self.pool)
                        .await?;
                    log::error!("quarantined corrupt queue row {id}: {e}");
                }
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl QueueBackend for SqliteQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), BackendError> {
        let mut job = job.clone();
        job.mark_enqueued();
        let payload = self.codec.encode(&job)?;
        let now = now_ms();
        sqlx::query(
            "INSERT INTO jobs (id, payload, status, visible_at, lease_expires_at, enqueued_at)
             VALUES (?1, ?2, 'pending', ?3, NULL, ?4)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&job.id)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, BackendError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut claimed = self.claim(1).await?;
            if let Some(job) = claimed.pop() {
                return Ok(Some(job));
            }
            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn pop_batch(&self, max: usize) -> Result<Vec<Job>, BackendError> {
        self.claim(max).await
    }

    async fn ack(&self, id: &str) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, id: &str, requeue_delay: Duration) -> Result<(), BackendError> {
        let visible = now_ms() + requeue_delay.as_millis() as i64;
        sqlx::query(
            "UPDATE jobs
             SET status = 'pending', visible_at = ?1, lease_expires_at = NULL
             WHERE id = ?2 AND status = 'inflight'",
        )
        .bind(visible)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue(&self, job: &Job, requeue_delay: Duration) -> Result<(), BackendError> {
        let payload = self.codec.encode(job)?;
        let visible = now_ms() + requeue_delay.as_millis() as i64;
        sqlx::query(
            "UPDATE jobs
             SET status = 'pending', payload = ?1, visible_at = ?2, lease_expires_at = NULL
             WHERE id = ?3",
        )
        .bind(payload)
        .bind(visible)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn qsize(&self) -> Result<usize, BackendError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }

    async fn clear(&self) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM jobs").execute(&self.pool).await?;
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<usize, BackendError> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'pending', lease_expires_at = NULL
             WHERE status = 'inflight' AND lease_expires_at <= ?1",
        )
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        let reclaimed = result.rows_affected() as usize;
        if reclaimed > 0 {
            log::warn!("reclaimed {reclaimed} expired queue leases");
        }
        Ok(reclaimed)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
