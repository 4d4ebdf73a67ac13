use geosync_core::db::{open_db, open_db_in_memory};
use geosync_core::{
    ExternalLayerConfig, JobQueue, JobStatus, Layer, NewSyncJob, Node, QueueError, SqliteJobQueue,
    SyncOperation, SyncPayload,
};

const T0: i64 = 1_700_000_000_000;

fn layer_config() -> ExternalLayerConfig {
    Layer::new("Rome", "rome")
        .with_connector("openwisp")
        .external
        .unwrap()
}

fn node_job(key: &str, operation: SyncOperation) -> NewSyncJob {
    let config = layer_config();
    NewSyncJob {
        ordering_key: key.to_string(),
        operation,
        payload: SyncPayload::Node(Node::new(config.layer_id, "Tower", "tower", 41.9, 12.5)),
        layer_config: config,
        max_attempts: 3,
    }
}

fn delete_job(key: &str, external_id: &str) -> NewSyncJob {
    NewSyncJob {
        ordering_key: key.to_string(),
        operation: SyncOperation::Delete,
        layer_config: layer_config(),
        payload: SyncPayload::ExternalId(external_id.to_string()),
        max_attempts: 3,
    }
}

#[test]
fn claim_returns_jobs_in_per_key_fifo_order() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteJobQueue::new(&conn);

    let add = queue.enqueue_at(&node_job("n1", SyncOperation::Add), T0).unwrap();
    let change = queue
        .enqueue_at(&node_job("n1", SyncOperation::Change), T0)
        .unwrap();
    let delete = queue.enqueue_at(&delete_job("n1", "id1"), T0).unwrap();

    let first = queue.claim_next(T0).unwrap().unwrap();
    assert_eq!(first.id, add.id);
    assert_eq!(first.status, JobStatus::Running);
    assert_eq!(first.attempts, 1);

    // change is blocked while add is running
    assert!(queue.claim_next(T0).unwrap().is_none());

    queue.complete(add.id, T0).unwrap();
    let second = queue.claim_next(T0).unwrap().unwrap();
    assert_eq!(second.id, change.id);
    queue.complete(change.id, T0).unwrap();

    let third = queue.claim_next(T0).unwrap().unwrap();
    assert_eq!(third.id, delete.id);
    assert_eq!(third.payload, SyncPayload::ExternalId("id1".to_string()));
}

#[test]
fn different_keys_are_claimed_independently() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteJobQueue::new(&conn);

    let a = queue.enqueue_at(&node_job("a", SyncOperation::Add), T0).unwrap();
    let b = queue.enqueue_at(&node_job("b", SyncOperation::Add), T0).unwrap();

    assert_eq!(queue.claim_next(T0).unwrap().unwrap().id, a.id);
    assert_eq!(queue.claim_next(T0).unwrap().unwrap().id, b.id);
    assert!(queue.claim_next(T0).unwrap().is_none());
}

#[test]
fn retry_delays_job_and_keeps_later_jobs_blocked() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteJobQueue::new(&conn);

    let add = queue.enqueue_at(&node_job("n1", SyncOperation::Add), T0).unwrap();
    queue
        .enqueue_at(&node_job("n1", SyncOperation::Change), T0)
        .unwrap();

    queue.claim_next(T0).unwrap().unwrap();
    queue.retry(add.id, "connector_timeout", T0 + 1_000, T0).unwrap();

    assert!(queue.claim_next(T0 + 999).unwrap().is_none());

    let again = queue.claim_next(T0 + 1_000).unwrap().unwrap();
    assert_eq!(again.id, add.id);
    assert_eq!(again.attempts, 2);
    assert_eq!(again.last_error.as_deref(), Some("connector_timeout"));
}

#[test]
fn dead_job_unblocks_its_key_and_is_listed() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteJobQueue::new(&conn);

    let add = queue.enqueue_at(&node_job("n1", SyncOperation::Add), T0).unwrap();
    let change = queue
        .enqueue_at(&node_job("n1", SyncOperation::Change), T0)
        .unwrap();

    queue.claim_next(T0).unwrap().unwrap();
    queue.dead(add.id, "connector_rejected: bad geometry", T0).unwrap();

    assert_eq!(queue.claim_next(T0).unwrap().unwrap().id, change.id);

    let dead = queue.dead_jobs().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, add.id);
    assert_eq!(
        dead[0].last_error.as_deref(),
        Some("connector_rejected: bad geometry")
    );

    let stats = queue.stats().unwrap();
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.running, 1);
}

#[test]
fn state_transitions_require_running_job() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteJobQueue::new(&conn);
    let add = queue.enqueue_at(&node_job("n1", SyncOperation::Add), T0).unwrap();

    assert!(matches!(
        queue.complete(add.id, T0),
        Err(QueueError::JobNotRunning(id)) if id == add.id
    ));
    assert!(matches!(
        queue.dead(999, "x", T0),
        Err(QueueError::JobNotRunning(999))
    ));
}

#[test]
fn stale_running_jobs_are_released() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteJobQueue::new(&conn);
    let add = queue.enqueue_at(&node_job("n1", SyncOperation::Add), T0).unwrap();

    queue.claim_next(T0).unwrap().unwrap();
    assert_eq!(queue.release_stale(T0, T0 + 10).unwrap(), 0);
    assert_eq!(queue.release_stale(T0 + 1, T0 + 10).unwrap(), 1);

    let job = queue.get_job(add.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.claimed_at_ms, None);

    let reclaimed = queue.claim_next(T0 + 10).unwrap().unwrap();
    assert_eq!(reclaimed.id, add.id);
    assert_eq!(reclaimed.attempts, 2);
}

#[test]
fn renewed_claim_is_not_released() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteJobQueue::new(&conn);
    let add = queue.enqueue_at(&node_job("n1", SyncOperation::Add), T0).unwrap();

    queue.claim_next(T0).unwrap().unwrap();
    queue.renew_claim(add.id, T0 + 50).unwrap();
    assert_eq!(queue.release_stale(T0 + 10, T0 + 60).unwrap(), 0);
    assert_eq!(
        queue.get_job(add.id).unwrap().unwrap().claimed_at_ms,
        Some(T0 + 50)
    );

    queue.complete(add.id, T0 + 70).unwrap();
    assert!(matches!(
        queue.renew_claim(add.id, T0 + 80),
        Err(QueueError::JobNotRunning(id)) if id == add.id
    ));
}

#[test]
fn mismatched_payload_is_not_stored() {
    let conn = open_db_in_memory().unwrap();
    let queue = SqliteJobQueue::new(&conn);

    let mut job = delete_job("n1", "id1");
    job.operation = SyncOperation::Add;
    assert!(matches!(
        queue.enqueue(&job),
        Err(QueueError::InvalidData(_))
    ));
    assert_eq!(queue.stats().unwrap().pending, 0);
}

#[test]
fn jobs_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geosync.db");

    let handle = {
        let conn = open_db(&path).unwrap();
        SqliteJobQueue::new(&conn)
            .enqueue(&node_job("n1", SyncOperation::Add))
            .unwrap()
    };

    let conn = open_db(&path).unwrap();
    let queue = SqliteJobQueue::new(&conn);
    let job = queue.get_job(handle.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.operation, SyncOperation::Add);
    assert_eq!(job.payload.as_node().unwrap().name, "Tower");
    assert_eq!(job.layer_config.connector_id(), Some("openwisp"));
}
