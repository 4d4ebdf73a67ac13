//! Hand-off from the write path to the durable job queue.
//!
//! # Invariants
//! - `enqueue` returns as soon as the job is persisted; it never waits for
//!   the connector.
//! - Payloads are owned snapshots. A job never refers back to live rows.
//! - Queue failures are reported to the caller as `DispatchError` and
//!   logged here; callers decide not to propagate them.

use crate::model::layer::ExternalLayerConfig;
use crate::model::node::Node;
use crate::sync::decision::SyncAction;
use crate::sync::job::{JobHandle, NewSyncJob, SyncOperation, SyncPayload};
use crate::sync::queue::{JobQueue, QueueError};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum DispatchError {
    /// The queue could not accept the job.
    DispatchUnavailable(QueueError),
    /// Payload shape does not fit the operation.
    InvalidPayload { operation: SyncOperation },
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DispatchUnavailable(err) => write!(f, "sync queue unavailable: {err}"),
            Self::InvalidPayload { operation } => {
                write!(f, "payload does not fit sync operation `{operation}`")
            }
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DispatchUnavailable(err) => Some(err),
            Self::InvalidPayload { .. } => None,
        }
    }
}

/// Schedules sync jobs for out-of-band execution.
pub struct SyncDispatcher<Q: JobQueue> {
    queue: Q,
    max_attempts: u32,
}

impl<Q: JobQueue> SyncDispatcher<Q> {
    pub fn new(queue: Q, max_attempts: u32) -> Self {
        Self {
            queue,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Queues one job for the connector of `layer_config`.
    ///
    /// `ordering_key` is the node id; jobs sharing it are delivered in the
    /// order they are enqueued.
    pub fn enqueue(
        &self,
        ordering_key: &str,
        payload: SyncPayload,
        layer_config: &ExternalLayerConfig,
        operation: SyncOperation,
    ) -> Result<JobHandle, DispatchError> {
        if !payload.fits(operation) {
            error!(
                "event=sync_enqueue module=sync status=error operation={} error_code=invalid_payload",
                operation
            );
            return Err(DispatchError::InvalidPayload { operation });
        }

        let job = NewSyncJob {
            ordering_key: ordering_key.to_string(),
            operation,
            layer_config: layer_config.clone(),
            payload,
            max_attempts: self.max_attempts,
        };

        match self.queue.enqueue(&job) {
            Ok(handle) => {
                info!(
                    "event=sync_enqueue module=sync status=ok job_id={} operation={} layer_id={} connector={}",
                    handle.id,
                    operation,
                    layer_config.layer_id,
                    layer_config.connector_id().unwrap_or("-")
                );
                Ok(handle)
            }
            Err(err) => {
                error!(
                    "event=sync_enqueue module=sync status=error operation={} layer_id={} error_code=dispatch_unavailable error={}",
                    operation, layer_config.layer_id, err
                );
                Err(DispatchError::DispatchUnavailable(err))
            }
        }
    }

    /// Builds the payload for a decided action and queues it.
    ///
    /// `add`/`change` snapshot `node`; `delete` sends only the external id
    /// carried by the action.
    pub fn dispatch(
        &self,
        action: &SyncAction,
        node: &Node,
        layer_config: &ExternalLayerConfig,
    ) -> Result<JobHandle, DispatchError> {
        let payload = match action {
            SyncAction::Add | SyncAction::Change => SyncPayload::Node(node.clone()),
            SyncAction::Delete { external_id } => SyncPayload::ExternalId(external_id.clone()),
        };
        self.enqueue(
            &node.id.to_string(),
            payload,
            layer_config,
            action.operation(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{DispatchError, SyncDispatcher};
    use crate::model::layer::Layer;
    use crate::model::node::Node;
    use crate::sync::decision::SyncAction;
    use crate::sync::job::{JobHandle, NewSyncJob, SyncOperation, SyncPayload};
    use crate::sync::queue::{JobQueue, QueueError, QueueResult};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingQueue {
        jobs: RefCell<Vec<NewSyncJob>>,
    }

    impl JobQueue for RecordingQueue {
        fn enqueue(&self, job: &NewSyncJob) -> QueueResult<JobHandle> {
            let mut jobs = self.jobs.borrow_mut();
            jobs.push(job.clone());
            Ok(JobHandle {
                id: jobs.len() as i64,
                ordering_key: job.ordering_key.clone(),
                operation: job.operation,
            })
        }
    }

    struct DownQueue;

    impl JobQueue for DownQueue {
        fn enqueue(&self, _job: &NewSyncJob) -> QueueResult<JobHandle> {
            Err(QueueError::InvalidData("queue offline".to_string()))
        }
    }

    #[test]
    fn delete_dispatch_carries_only_external_id() {
        let layer = Layer::new("Rome", "rome").with_connector("openwisp");
        let node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
        let dispatcher = SyncDispatcher::new(RecordingQueue::default(), 3);

        dispatcher
            .dispatch(
                &SyncAction::Delete {
                    external_id: "ext-42".to_string(),
                },
                &node,
                layer.external.as_ref().unwrap(),
            )
            .unwrap();

        let jobs = dispatcher.queue.jobs.borrow();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].operation, SyncOperation::Delete);
        assert_eq!(jobs[0].payload, SyncPayload::ExternalId("ext-42".to_string()));
        assert_eq!(jobs[0].ordering_key, node.id.to_string());
        assert_eq!(jobs[0].max_attempts, 3);
    }

    #[test]
    fn add_dispatch_snapshots_node() {
        let layer = Layer::new("Rome", "rome").with_connector("openwisp");
        let mut node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
        let dispatcher = SyncDispatcher::new(RecordingQueue::default(), 3);

        dispatcher
            .dispatch(&SyncAction::Add, &node, layer.external.as_ref().unwrap())
            .unwrap();
        node.name = "Renamed".to_string();

        let jobs = dispatcher.queue.jobs.borrow();
        let snapshot = jobs[0].payload.as_node().unwrap();
        assert_eq!(snapshot.name, "Tower");
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let layer = Layer::new("Rome", "rome").with_connector("openwisp");
        let dispatcher = SyncDispatcher::new(RecordingQueue::default(), 3);
        let err = dispatcher
            .enqueue(
                "key",
                SyncPayload::ExternalId("ext".to_string()),
                layer.external.as_ref().unwrap(),
                SyncOperation::Add,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPayload { .. }));
        assert!(dispatcher.queue.jobs.borrow().is_empty());
    }

    #[test]
    fn queue_failure_maps_to_dispatch_unavailable() {
        let layer = Layer::new("Rome", "rome").with_connector("openwisp");
        let node = Node::new(layer.id, "Tower", "tower", 41.9, 12.5);
        let dispatcher = SyncDispatcher::new(DownQueue, 3);
        let err = dispatcher
            .dispatch(&SyncAction::Change, &node, layer.external.as_ref().unwrap())
            .unwrap_err();
        assert!(matches!(err, DispatchError::DispatchUnavailable(_)));
    }
}
