use geosync_core::db::open_db_in_memory;
use geosync_core::{
    ConnectorOutcome, ConnectorRegistry, ConnectorRequest, ConnectorResult, ExternalIdentity,
    ExternalLayerConfig, HookOutcome, JobHandle, JobQueue, JobStatus, Layer, LayerConnector,
    LifecycleHooks, NewSyncJob, Node, NodeService, QueueError, QueueResult, RepoError,
    SqliteJobQueue, SqliteLayerRepository, SqliteNodeRepository, SyncConfig, SyncDispatcher,
    SyncOperation, SyncPayload, SyncWorker,
};
use std::sync::{Arc, Mutex};

struct RecordingConnector {
    seen: Mutex<Vec<(SyncOperation, SyncPayload)>>,
}

impl LayerConnector for RecordingConnector {
    fn connector_id(&self) -> &str {
        "openwisp"
    }

    fn push(&self, request: &ConnectorRequest) -> ConnectorResult<ConnectorOutcome> {
        self.seen
            .lock()
            .unwrap()
            .push((request.operation, request.payload.clone()));
        Ok(ConnectorOutcome::default())
    }
}

struct DownQueue;

impl JobQueue for DownQueue {
    fn enqueue(&self, _job: &NewSyncJob) -> QueueResult<JobHandle> {
        Err(QueueError::InvalidData("queue offline".to_string()))
    }
}

fn operations(queue: &SqliteJobQueue<'_>) -> Vec<(SyncOperation, SyncPayload)> {
    queue
        .jobs_with_status(JobStatus::Pending)
        .unwrap()
        .into_iter()
        .map(|job| (job.operation, job.payload))
        .collect()
}

#[test]
fn create_update_delete_on_external_layer_emits_ordered_jobs() {
    let conn = open_db_in_memory().unwrap();
    let config = SyncConfig::default();
    let service = NodeService::sqlite(&conn, &config);

    let layer = Layer::new("Rome", "rome").with_connector("openwisp");
    service.create_layer(&layer).unwrap();

    let mut node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
    let created = service.create_node(&node).unwrap();
    assert_eq!(
        created.sync.job().map(|job| job.operation),
        Some(SyncOperation::Add)
    );

    node.name = "Tower B".to_string();
    let updated = service.update_node(&node).unwrap();
    assert_eq!(
        updated.sync.job().map(|job| job.operation),
        Some(SyncOperation::Change)
    );

    service
        .save_external_identity(node.id, &ExternalIdentity::new("ext-42", ""))
        .unwrap();
    let deleted = service.delete_node(node.id).unwrap();
    assert_eq!(
        deleted.sync.job().map(|job| job.operation),
        Some(SyncOperation::Delete)
    );

    assert!(service.get_node(node.id).unwrap().is_none());
    let identities: i64 = conn
        .query_row("SELECT COUNT(*) FROM nodes_external;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(identities, 0);

    let queue = SqliteJobQueue::new(&conn);
    let jobs = operations(&queue);
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0].0, SyncOperation::Add);
    assert_eq!(jobs[0].1.as_node().unwrap().name, "Tower");
    assert_eq!(jobs[1].0, SyncOperation::Change);
    assert_eq!(jobs[1].1.as_node().unwrap().name, "Tower B");
    assert_eq!(
        jobs[2],
        (
            SyncOperation::Delete,
            SyncPayload::ExternalId("ext-42".to_string())
        )
    );

    let connector = Arc::new(RecordingConnector {
        seen: Mutex::new(Vec::new()),
    });
    let mut registry = ConnectorRegistry::new();
    registry
        .register(Arc::clone(&connector) as Arc<dyn LayerConnector>)
        .unwrap();
    let worker = SyncWorker::new(Arc::new(registry), config);
    assert_eq!(worker.drain(&conn, i64::MAX).unwrap().len(), 3);

    let seen: Vec<_> = connector
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|(operation, _)| *operation)
        .collect();
    assert_eq!(
        seen,
        vec![
            SyncOperation::Add,
            SyncOperation::Change,
            SyncOperation::Delete
        ]
    );
}

#[test]
fn internal_layer_never_enqueues() {
    let conn = open_db_in_memory().unwrap();
    let service = NodeService::sqlite(&conn, &SyncConfig::default());

    let layer = Layer::new("Milan", "milan");
    service.create_layer(&layer).unwrap();

    let mut node = Node::new(layer.id, "Tower", "tower", 45.4, 9.2);
    node.external = Some(ExternalIdentity::new("ext-1", ""));
    assert_eq!(service.create_node(&node).unwrap().sync, HookOutcome::Skipped);
    node.name = "Renamed".to_string();
    assert_eq!(service.update_node(&node).unwrap().sync, HookOutcome::Skipped);
    assert_eq!(service.delete_node(node.id).unwrap().sync, HookOutcome::Skipped);

    assert_eq!(SqliteJobQueue::new(&conn).stats().unwrap().pending, 0);
}

#[test]
fn external_layer_without_connector_never_enqueues() {
    let conn = open_db_in_memory().unwrap();
    let service = NodeService::sqlite(&conn, &SyncConfig::default());

    let mut layer = Layer::new("Rome", "rome");
    layer.is_external = true;
    service.create_layer(&layer).unwrap();

    let node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
    assert_eq!(service.create_node(&node).unwrap().sync, HookOutcome::Skipped);

    service
        .set_external_config(&ExternalLayerConfig::new(layer.id, None))
        .unwrap();
    assert_eq!(service.update_node(&node).unwrap().sync, HookOutcome::Skipped);

    service
        .set_external_config(&ExternalLayerConfig::new(
            layer.id,
            Some("openwisp".to_string()),
        ))
        .unwrap();
    assert!(matches!(
        service.update_node(&node).unwrap().sync,
        HookOutcome::Enqueued(_)
    ));

    service.set_layer_external(layer.id, false).unwrap();
    assert_eq!(service.update_node(&node).unwrap().sync, HookOutcome::Skipped);

    assert_eq!(SqliteJobQueue::new(&conn).stats().unwrap().pending, 1);
}

#[test]
fn delete_without_external_id_skips_sync_but_deletes() {
    let conn = open_db_in_memory().unwrap();
    let service = NodeService::sqlite(&conn, &SyncConfig::default());
    let layer = Layer::new("Rome", "rome").with_connector("openwisp");
    service.create_layer(&layer).unwrap();

    let node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
    service.create_node(&node).unwrap();
    service
        .save_external_identity(node.id, &ExternalIdentity::new("", "{}"))
        .unwrap();

    let deleted = service.delete_node(node.id).unwrap();
    assert_eq!(deleted.sync, HookOutcome::Skipped);
    assert!(service.get_node(node.id).unwrap().is_none());

    let queue = SqliteJobQueue::new(&conn);
    let jobs = operations(&queue);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].0, SyncOperation::Add);
}

#[test]
fn queue_down_does_not_block_node_update() {
    let conn = open_db_in_memory().unwrap();
    let layer = Layer::new("Rome", "rome").with_connector("openwisp");
    let node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
    NodeService::sqlite(&conn, &SyncConfig::default())
        .create_layer(&layer)
        .unwrap();

    let service = NodeService::new(
        SqliteNodeRepository::new(&conn),
        SqliteLayerRepository::new(&conn),
        LifecycleHooks::new(SyncDispatcher::new(DownQueue, 3)),
    );
    let created = service.create_node(&node).unwrap();
    assert!(matches!(created.sync, HookOutcome::DispatchFailed(_)));

    let mut renamed = node.clone();
    renamed.name = "Tower B".to_string();
    let updated = service.update_node(&renamed).unwrap();
    assert!(matches!(updated.sync, HookOutcome::DispatchFailed(_)));
    assert_eq!(service.get_node(node.id).unwrap().unwrap().name, "Tower B");
}

#[test]
fn missing_queue_table_does_not_block_node_writes() {
    let conn = open_db_in_memory().unwrap();
    let service = NodeService::sqlite(&conn, &SyncConfig::default());
    let layer = Layer::new("Rome", "rome").with_connector("openwisp");
    service.create_layer(&layer).unwrap();
    let mut node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
    service.create_node(&node).unwrap();

    conn.execute_batch("DROP TABLE sync_jobs;").unwrap();

    node.name = "Tower B".to_string();
    let updated = service.update_node(&node).unwrap();
    match updated.sync {
        HookOutcome::DispatchFailed(reason) => assert!(reason.contains("unavailable")),
        other => panic!("expected dispatch failure, got {other:?}"),
    }
    assert_eq!(service.get_node(node.id).unwrap().unwrap().name, "Tower B");
}

#[test]
fn service_rejects_invalid_extra_data() {
    let conn = open_db_in_memory().unwrap();
    let service = NodeService::sqlite(&conn, &SyncConfig::default());
    let layer = Layer::new("Rome", "rome").with_connector("openwisp");
    service.create_layer(&layer).unwrap();
    let node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
    service.create_node(&node).unwrap();

    let err = service
        .save_external_identity(node.id, &ExternalIdentity::new("ext-1", "{a: 1}"))
        .unwrap_err();
    assert!(matches!(err, RepoError::ExternalIdentity(_)));
    assert_eq!(
        err.to_string(),
        "The specified configuration is not valid JSON"
    );

    let saved = service
        .save_external_identity(node.id, &ExternalIdentity::new("ext-1", "{'a': 1}"))
        .unwrap();
    assert_eq!(saved.extra_data, r#"{"a": 1}"#);
}

#[test]
fn deleting_unknown_node_fails_without_sync() {
    let conn = open_db_in_memory().unwrap();
    let service = NodeService::sqlite(&conn, &SyncConfig::default());
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        service.delete_node(missing),
        Err(RepoError::NodeNotFound(id)) if id == missing
    ));
    assert_eq!(SqliteJobQueue::new(&conn).stats().unwrap().pending, 0);
}

#[test]
fn failed_row_delete_discards_delete_job() {
    let conn = open_db_in_memory().unwrap();
    let service = NodeService::sqlite(&conn, &SyncConfig::default());
    let layer = Layer::new("Rome", "rome").with_connector("openwisp");
    service.create_layer(&layer).unwrap();
    let node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
    service.create_node(&node).unwrap();
    service
        .save_external_identity(node.id, &ExternalIdentity::new("ext-42", ""))
        .unwrap();

    conn.execute_batch(
        "CREATE TRIGGER keep_nodes BEFORE DELETE ON nodes
         BEGIN
            SELECT RAISE(ABORT, 'node is locked');
         END;",
    )
    .unwrap();

    assert!(service.delete_node(node.id).is_err());

    let stored = service.get_node(node.id).unwrap().unwrap();
    assert_eq!(stored.external_id(), Some("ext-42"));
    let queue = SqliteJobQueue::new(&conn);
    let pending: Vec<_> = operations(&queue)
        .into_iter()
        .map(|(operation, _)| operation)
        .collect();
    assert_eq!(pending, vec![SyncOperation::Add]);

    conn.execute_batch("DROP TRIGGER keep_nodes;").unwrap();
    let deleted = service.delete_node(node.id).unwrap();
    assert_eq!(
        deleted.sync.job().map(|job| job.operation),
        Some(SyncOperation::Delete)
    );
    assert_eq!(queue.stats().unwrap().pending, 2);
}
