//! Background execution of queued sync jobs.
//!
//! # Responsibility
//! - Claim jobs, call the layer's connector with a bounded timeout.
//! - Complete, reschedule with exponential backoff, or dead-letter.
//! - Record external ids reported by connectors.
//!
//! # Invariants
//! - Each worker thread owns its own SQLite connection.
//! - Timeouts and unreachable connectors are retried; rejections and unknown
//!   connectors are permanent.
//! - Dead-lettered jobs are always logged at error level.
//! - A timed-out call keeps its job `running` until the connector thread
//!   returns, so later jobs for the same node wait behind it. The attempt is
//!   then settled as a timeout (retry or dead), whatever the late result.
//! - One worker (and its clones) serves one database.
//!
//! Logging goes through the `log` facade; embedding applications call
//! `init_logging` before `spawn_workers`, otherwise dead-letter lines are
//! discarded.

use crate::config::SyncConfig;
use crate::db::{now_epoch_ms, open_db};
use crate::model::external::ExternalIdentity;
use crate::repo::node_repo::{NodeRepository, SqliteNodeRepository};
use crate::repo::RepoError;
use crate::sync::connector::{
    ConnectorError, ConnectorOutcome, ConnectorRegistry, ConnectorRequest, ConnectorResult,
    LayerConnector,
};
use crate::sync::job::{JobId, SyncJob, SyncOperation};
use crate::sync::queue::{QueueError, QueueResult, SqliteJobQueue};
use log::{error, info, warn};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Result of processing one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        job_id: JobId,
        operation: SyncOperation,
    },
    /// The call timed out and is still running; the job stays claimed.
    TimedOut { job_id: JobId, attempt: u32 },
    Retrying {
        job_id: JobId,
        attempt: u32,
        available_at_ms: i64,
    },
    Dead {
        job_id: JobId,
        error: String,
    },
}

type CallResult = ConnectorResult<ConnectorOutcome>;

/// Connector call that outlived its timeout.
struct OverdueCall {
    job: SyncJob,
    started_at: Instant,
    receiver: Receiver<CallResult>,
}

enum CallState {
    Returned(CallResult),
    Overdue(Receiver<CallResult>),
}

/// Executes sync jobs against registered connectors.
///
/// Clones share the connector registry and the set of overdue calls.
#[derive(Clone)]
pub struct SyncWorker {
    registry: Arc<ConnectorRegistry>,
    config: SyncConfig,
    overdue: Arc<Mutex<Vec<OverdueCall>>>,
}

impl SyncWorker {
    pub fn new(registry: Arc<ConnectorRegistry>, config: SyncConfig) -> Self {
        Self {
            registry,
            config,
            overdue: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Settles one overdue call that has returned, or else claims and
    /// processes at most one job.
    ///
    /// Returns `Ok(None)` when nothing is claimable at `now_ms`.
    pub fn process_next(&self, conn: &Connection, now_ms: i64) -> QueueResult<Option<JobOutcome>> {
        let queue = SqliteJobQueue::new(conn);
        if let Some(outcome) = self.settle_overdue(&queue, conn, now_ms)? {
            return Ok(Some(outcome));
        }

        let Some(job) = queue.claim_next(now_ms)? else {
            return Ok(None);
        };

        let started_at = Instant::now();
        let Some(connector) = self.registry.resolve(&job.layer_config) else {
            let message = format!(
                "connector_not_registered: {}",
                job.layer_config.connector_id().unwrap_or("-")
            );
            return self.bury(&queue, &job, message, now_ms).map(Some);
        };

        match self.call_connector(connector, request_for(&job)) {
            CallState::Returned(result) => self
                .settle(&queue, conn, &job, result, started_at, now_ms)
                .map(Some),
            CallState::Overdue(receiver) => {
                warn!(
                    "event=sync_job module=sync status=timeout job_id={} operation={} attempt={} call_timeout_ms={}",
                    job.id, job.operation, job.attempts, self.config.call_timeout_ms
                );
                let outcome = JobOutcome::TimedOut {
                    job_id: job.id,
                    attempt: job.attempts,
                };
                self.overdue_calls().push(OverdueCall {
                    job,
                    started_at,
                    receiver,
                });
                Ok(Some(outcome))
            }
        }
    }

    /// Returns whether any timed-out connector call is still running.
    pub fn has_overdue_calls(&self) -> bool {
        !self.overdue_calls().is_empty()
    }

    fn overdue_calls(&self) -> MutexGuard<'_, Vec<OverdueCall>> {
        self.overdue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finishes the first overdue call whose connector thread has returned.
    fn settle_overdue(
        &self,
        queue: &SqliteJobQueue<'_>,
        conn: &Connection,
        now_ms: i64,
    ) -> QueueResult<Option<JobOutcome>> {
        let returned = {
            let mut overdue = self.overdue_calls();
            let index = overdue
                .iter()
                .position(|call| !matches!(call.receiver.try_recv(), Err(TryRecvError::Empty)));
            index.map(|index| overdue.swap_remove(index))
        };
        let Some(call) = returned else {
            return Ok(None);
        };

        let timeout = Err(ConnectorError::Timeout {
            after_ms: self.config.call_timeout_ms,
        });
        match self.settle(queue, conn, &call.job, timeout, call.started_at, now_ms) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(QueueError::JobNotRunning(job_id)) => {
                warn!(
                    "event=sync_job module=sync status=skipped job_id={} reason=claim_lost",
                    job_id
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn settle(
        &self,
        queue: &SqliteJobQueue<'_>,
        conn: &Connection,
        job: &SyncJob,
        result: CallResult,
        started_at: Instant,
        now_ms: i64,
    ) -> QueueResult<JobOutcome> {
        let duration_ms = started_at.elapsed().as_millis();
        match result {
            Ok(outcome) => {
                queue.complete(job.id, now_epoch_ms())?;
                info!(
                    "event=sync_job module=sync status=ok job_id={} operation={} attempt={} duration_ms={}",
                    job.id, job.operation, job.attempts, duration_ms
                );
                record_identity(conn, job, &outcome);
                Ok(JobOutcome::Completed {
                    job_id: job.id,
                    operation: job.operation,
                })
            }
            Err(err) if err.is_retryable() && job.attempts < job.max_attempts => {
                let available_at_ms = now_ms.saturating_add(
                    i64::try_from(self.config.backoff_ms(job.attempts)).unwrap_or(i64::MAX),
                );
                queue.retry(job.id, &err.to_string(), available_at_ms, now_epoch_ms())?;
                warn!(
                    "event=sync_job module=sync status=retry job_id={} operation={} attempt={} max_attempts={} duration_ms={} error_code={}",
                    job.id,
                    job.operation,
                    job.attempts,
                    job.max_attempts,
                    duration_ms,
                    err.code()
                );
                Ok(JobOutcome::Retrying {
                    job_id: job.id,
                    attempt: job.attempts,
                    available_at_ms,
                })
            }
            Err(err) => {
                let message = format!("{}: {err}", err.code());
                self.bury(queue, job, message, now_ms)
            }
        }
    }

    /// Processes claimable jobs until the queue has nothing ready at `now_ms`.
    pub fn drain(&self, conn: &Connection, now_ms: i64) -> QueueResult<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.process_next(conn, now_ms)? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn bury(
        &self,
        queue: &SqliteJobQueue<'_>,
        job: &SyncJob,
        message: String,
        now_ms: i64,
    ) -> QueueResult<JobOutcome> {
        queue.dead(job.id, &message, now_ms)?;
        error!(
            "event=sync_job_dead module=sync status=error job_id={} operation={} layer_id={} attempts={} error={}",
            job.id, job.operation, job.layer_config.layer_id, job.attempts, message
        );
        Ok(JobOutcome::Dead {
            job_id: job.id,
            error: message,
        })
    }

    fn call_connector(
        &self,
        connector: Arc<dyn LayerConnector>,
        request: ConnectorRequest,
    ) -> CallState {
        let timeout = self.config.call_timeout();
        let (sender, receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("geosync-connector".to_string())
            .spawn(move || {
                let _ = sender.send(connector.push(&request));
            });
        if let Err(err) = spawned {
            return CallState::Returned(Err(ConnectorError::Unreachable(format!(
                "failed to start connector call: {err}"
            ))));
        }

        match receiver.recv_timeout(timeout) {
            Ok(result) => CallState::Returned(result),
            Err(RecvTimeoutError::Timeout) => CallState::Overdue(receiver),
            Err(RecvTimeoutError::Disconnected) => CallState::Returned(Err(
                ConnectorError::Rejected("connector call panicked".to_string()),
            )),
        }
    }

    /// Starts a background worker thread on the database at `db_path`.
    pub fn spawn(&self, db_path: impl AsRef<Path>) -> std::io::Result<WorkerHandle> {
        let worker = self.clone();
        let db_path = db_path.as_ref().to_path_buf();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("geosync-worker".to_string())
            .spawn(move || worker.run_loop(&db_path, &flag))?;

        Ok(WorkerHandle { shutdown, thread })
    }

    fn run_loop(&self, db_path: &Path, shutdown: &AtomicBool) {
        let conn = match open_db(db_path) {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=sync_worker module=sync status=error error_code=db_open_failed error={}",
                    err
                );
                return;
            }
        };
        info!(
            "event=sync_worker module=sync status=start poll_interval_ms={} call_timeout_ms={}",
            self.config.poll_interval_ms, self.config.call_timeout_ms
        );

        let stale_every = Duration::from_millis(self.config.stale_lease_ms / 2);
        let mut last_stale_check: Option<Instant> = None;

        while !shutdown.load(Ordering::Relaxed) {
            if last_stale_check.map_or(true, |at| at.elapsed() >= stale_every) {
                self.release_stale(&conn);
                last_stale_check = Some(Instant::now());
            }

            match self.process_next(&conn, now_epoch_ms()) {
                Ok(Some(_)) => {}
                Ok(None) => thread::sleep(self.config.poll_interval()),
                Err(err) => {
                    error!(
                        "event=sync_worker module=sync status=error error_code=queue_failed error={}",
                        err
                    );
                    thread::sleep(self.config.poll_interval());
                }
            }
        }

        info!("event=sync_worker module=sync status=stopped");
    }

    fn release_stale(&self, conn: &Connection) {
        let now_ms = now_epoch_ms();
        let queue = SqliteJobQueue::new(conn);
        let overdue_ids: Vec<JobId> = self.overdue_calls().iter().map(|call| call.job.id).collect();
        for job_id in overdue_ids {
            if let Err(err) = queue.renew_claim(job_id, now_ms) {
                warn!(
                    "event=sync_renew_claim module=sync status=error job_id={} error={}",
                    job_id, err
                );
            }
        }

        let lease = i64::try_from(self.config.stale_lease_ms).unwrap_or(i64::MAX);
        match queue.release_stale(now_ms.saturating_sub(lease), now_ms) {
            Ok(0) => {}
            Ok(count) => warn!(
                "event=sync_release_stale module=sync status=ok released={}",
                count
            ),
            Err(err) => error!(
                "event=sync_release_stale module=sync status=error error={}",
                err
            ),
        }
    }
}

/// Starts `config.workers` worker threads on one database file.
pub fn spawn_workers(
    registry: Arc<ConnectorRegistry>,
    config: SyncConfig,
    db_path: impl AsRef<Path>,
) -> std::io::Result<Vec<WorkerHandle>> {
    let worker = SyncWorker::new(registry, config);
    (0..worker.config.workers)
        .map(|_| worker.spawn(db_path.as_ref()))
        .collect()
}

/// Control handle for a spawned worker thread.
pub struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Asks the worker to stop after its current job.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// Returns `false` if the worker thread panicked.
    pub fn shutdown(self) -> bool {
        self.request_shutdown();
        self.thread.join().is_ok()
    }
}

fn request_for(job: &SyncJob) -> ConnectorRequest {
    ConnectorRequest {
        job_id: job.id,
        attempt: job.attempts,
        operation: job.operation,
        layer: job.layer_config.clone(),
        payload: job.payload.clone(),
    }
}

/// Stores the external id a connector reported for an add/change.
///
/// The node may have been deleted meanwhile; that is logged and skipped.
fn record_identity(conn: &Connection, job: &SyncJob, outcome: &ConnectorOutcome) {
    let Some(external_id) = outcome.external_id.as_deref() else {
        return;
    };
    let Some(node) = job.payload.as_node() else {
        return;
    };

    let repo = SqliteNodeRepository::new(conn);
    let existing_extra = match repo.get_node(node.id) {
        Ok(Some(current)) => current.external.map(|identity| identity.extra_data),
        Ok(None) => {
            info!(
                "event=sync_identity module=sync status=skipped job_id={} reason=node_missing",
                job.id
            );
            return;
        }
        Err(err) => {
            error!(
                "event=sync_identity module=sync status=error job_id={} error={}",
                job.id, err
            );
            return;
        }
    };

    let identity = ExternalIdentity::new(
        external_id,
        outcome
            .extra_data
            .clone()
            .or(existing_extra)
            .unwrap_or_default(),
    );
    match repo.save_external_identity(node.id, &identity) {
        Ok(_) => info!(
            "event=sync_identity module=sync status=ok job_id={}",
            job.id
        ),
        Err(RepoError::NodeNotFound(_)) => info!(
            "event=sync_identity module=sync status=skipped job_id={} reason=node_missing",
            job.id
        ),
        Err(err) => warn!(
            "event=sync_identity module=sync status=error job_id={} error={}",
            job.id, err
        ),
    }
}
