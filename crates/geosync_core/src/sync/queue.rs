//! Durable sync job queue backed by SQLite.
//!
//! # Responsibility
//! - Persist dispatched jobs so they survive process restarts.
//! - Hand jobs to workers in per-node FIFO order.
//! - Track retries and dead-lettered jobs.
//!
//! # Invariants
//! - A job is claimable only when no earlier job with the same
//!   `ordering_key` is still `pending` or `running`.
//! - Claiming is a single `UPDATE .. RETURNING`, so two workers can never
//!   claim the same job.
//! - `attempts` is incremented on every claim; delivery is at-least-once.

use crate::db::{now_epoch_ms, DbError};
use crate::model::layer::ExternalLayerConfig;
use crate::sync::job::{
    JobHandle, JobId, JobStatus, NewSyncJob, SyncJob, SyncOperation, SyncPayload,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const JOB_COLUMNS: &str = "id,
    ordering_key,
    operation,
    layer_config,
    payload,
    status,
    attempts,
    max_attempts,
    available_at,
    claimed_at,
    last_error";

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug)]
pub enum QueueError {
    Db(DbError),
    Serialization(String),
    InvalidData(String),
    /// The job does not exist or is not in the state the call expects.
    JobNotRunning(JobId),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(message) => write!(f, "job serialization failed: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted job data: {message}"),
            Self::JobNotRunning(id) => write!(f, "sync job {id} is not running"),
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(_) | Self::InvalidData(_) | Self::JobNotRunning(_) => None,
        }
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Write side of the queue as seen by the dispatcher.
pub trait JobQueue {
    /// Durably stores `job` and returns once it is persisted.
    fn enqueue(&self, job: &NewSyncJob) -> QueueResult<JobHandle>;
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub dead: u64,
}

/// SQLite-backed job queue.
pub struct SqliteJobQueue<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteJobQueue<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Stores `job`, making it available from `now_ms`.
    pub fn enqueue_at(&self, job: &NewSyncJob, now_ms: i64) -> QueueResult<JobHandle> {
        if !job.payload.fits(job.operation) {
            return Err(QueueError::InvalidData(format!(
                "payload does not fit operation `{}`",
                job.operation
            )));
        }
        let layer_config = serde_json::to_string(&job.layer_config)?;
        let payload = serde_json::to_string(&job.payload)?;

        self.conn.execute(
            "INSERT INTO sync_jobs (
                ordering_key,
                operation,
                layer_config,
                payload,
                status,
                attempts,
                max_attempts,
                available_at,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6, ?6);",
            params![
                job.ordering_key.as_str(),
                job.operation.as_str(),
                layer_config,
                payload,
                job.max_attempts.max(1),
                now_ms,
            ],
        )?;

        Ok(JobHandle {
            id: self.conn.last_insert_rowid(),
            ordering_key: job.ordering_key.clone(),
            operation: job.operation,
        })
    }

    /// Claims the oldest eligible job and marks it `running`.
    pub fn claim_next(&self, now_ms: i64) -> QueueResult<Option<SyncJob>> {
        let sql = format!(
            "UPDATE sync_jobs
             SET
                status = 'running',
                attempts = attempts + 1,
                claimed_at = ?1,
                updated_at = ?1
             WHERE id = (
                SELECT j.id
                FROM sync_jobs j
                WHERE j.status = 'pending'
                  AND j.available_at <= ?1
                  AND NOT EXISTS (
                    SELECT 1
                    FROM sync_jobs e
                    WHERE e.ordering_key = j.ordering_key
                      AND e.id < j.id
                      AND e.status IN ('pending', 'running')
                  )
                ORDER BY j.id ASC
                LIMIT 1
             )
             RETURNING {JOB_COLUMNS};"
        );

        let raw = self
            .conn
            .query_row(&sql, [now_ms], read_raw_job)
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    /// Marks a running job as successfully delivered.
    pub fn complete(&self, id: JobId, now_ms: i64) -> QueueResult<()> {
        let changed = self.conn.execute(
            "UPDATE sync_jobs
             SET status = 'done', last_error = NULL, updated_at = ?2
             WHERE id = ?1 AND status = 'running';",
            params![id, now_ms],
        )?;
        ensure_changed(changed, id)
    }

    /// Puts a running job back to `pending`, claimable from `available_at_ms`.
    pub fn retry(
        &self,
        id: JobId,
        error: &str,
        available_at_ms: i64,
        now_ms: i64,
    ) -> QueueResult<()> {
        let changed = self.conn.execute(
            "UPDATE sync_jobs
             SET
                status = 'pending',
                available_at = ?3,
                claimed_at = NULL,
                last_error = ?2,
                updated_at = ?4
             WHERE id = ?1 AND status = 'running';",
            params![id, error, available_at_ms, now_ms],
        )?;
        ensure_changed(changed, id)
    }

    /// Moves a running job to the dead-letter state.
    pub fn dead(&self, id: JobId, error: &str, now_ms: i64) -> QueueResult<()> {
        let changed = self.conn.execute(
            "UPDATE sync_jobs
             SET status = 'dead', last_error = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'running';",
            params![id, error, now_ms],
        )?;
        ensure_changed(changed, id)
    }

    /// Extends the claim of a running job whose call has not returned yet.
    pub fn renew_claim(&self, id: JobId, now_ms: i64) -> QueueResult<()> {
        let changed = self.conn.execute(
            "UPDATE sync_jobs
             SET claimed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'running';",
            params![id, now_ms],
        )?;
        ensure_changed(changed, id)
    }

    /// Returns `running` jobs claimed before `claimed_before_ms` to `pending`.
    ///
    /// Used to recover jobs whose worker died mid-delivery.
    pub fn release_stale(&self, claimed_before_ms: i64, now_ms: i64) -> QueueResult<usize> {
        let released = self.conn.execute(
            "UPDATE sync_jobs
             SET
                status = 'pending',
                claimed_at = NULL,
                last_error = 'released after stale claim',
                updated_at = ?2
             WHERE status = 'running' AND claimed_at < ?1;",
            params![claimed_before_ms, now_ms],
        )?;
        Ok(released)
    }

    pub fn get_job(&self, id: JobId) -> QueueResult<Option<SyncJob>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = ?1;"),
                [id],
                read_raw_job,
            )
            .optional()?;
        raw.map(RawJob::into_job).transpose()
    }

    /// Jobs that exhausted their attempts or were rejected, oldest first.
    pub fn dead_jobs(&self) -> QueueResult<Vec<SyncJob>> {
        self.jobs_with_status(JobStatus::Dead)
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> QueueResult<Vec<SyncJob>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM sync_jobs WHERE status = ?1 ORDER BY id ASC;"
        ))?;
        let raws = stmt
            .query_map([status.as_str()], read_raw_job)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawJob::into_job).collect()
    }

    pub fn stats(&self) -> QueueResult<QueueStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM sync_jobs GROUP BY status;")?;
        let mut rows = stmt.query([])?;
        let mut stats = QueueStats::default();
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count = u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0);
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Running) => stats.running = count,
                Some(JobStatus::Done) => stats.done = count,
                Some(JobStatus::Dead) => stats.dead = count,
                None => {
                    return Err(QueueError::InvalidData(format!(
                        "invalid status `{status}` in sync_jobs.status"
                    )));
                }
            }
        }
        Ok(stats)
    }
}

impl JobQueue for SqliteJobQueue<'_> {
    fn enqueue(&self, job: &NewSyncJob) -> QueueResult<JobHandle> {
        self.enqueue_at(job, now_epoch_ms())
    }
}

fn ensure_changed(changed: usize, id: JobId) -> QueueResult<()> {
    if changed == 0 {
        return Err(QueueError::JobNotRunning(id));
    }
    Ok(())
}

struct RawJob {
    id: JobId,
    ordering_key: String,
    operation: String,
    layer_config: String,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    available_at_ms: i64,
    claimed_at_ms: Option<i64>,
    last_error: Option<String>,
}

fn read_raw_job(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get("id")?,
        ordering_key: row.get("ordering_key")?,
        operation: row.get("operation")?,
        layer_config: row.get("layer_config")?,
        payload: row.get("payload")?,
        status: row.get("status")?,
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        available_at_ms: row.get("available_at")?,
        claimed_at_ms: row.get("claimed_at")?,
        last_error: row.get("last_error")?,
    })
}

impl RawJob {
    fn into_job(self) -> QueueResult<SyncJob> {
        let operation = SyncOperation::parse(&self.operation).ok_or_else(|| {
            QueueError::InvalidData(format!(
                "invalid operation `{}` in sync_jobs.operation",
                self.operation
            ))
        })?;
        let status = JobStatus::parse(&self.status).ok_or_else(|| {
            QueueError::InvalidData(format!(
                "invalid status `{}` in sync_jobs.status",
                self.status
            ))
        })?;
        let layer_config: ExternalLayerConfig = serde_json::from_str(&self.layer_config)?;
        let payload: SyncPayload = serde_json::from_str(&self.payload)?;

        Ok(SyncJob {
            id: self.id,
            ordering_key: self.ordering_key,
            operation,
            layer_config,
            payload,
            status,
            attempts: to_u32(self.attempts, "attempts")?,
            max_attempts: to_u32(self.max_attempts, "max_attempts")?,
            available_at_ms: self.available_at_ms,
            claimed_at_ms: self.claimed_at_ms,
            last_error: self.last_error,
        })
    }
}

fn to_u32(value: i64, column: &str) -> QueueResult<u32> {
    u32::try_from(value).map_err(|_| {
        QueueError::InvalidData(format!("invalid value `{value}` in sync_jobs.{column}"))
    })
}
