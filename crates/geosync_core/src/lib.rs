//! Core of the geosync catalog: layers, nodes and their synchronization to
//! external systems.
//! This crate is the single source of truth for sync invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{ConfigError, SyncConfig};
pub use logging::{default_log_level, flush_logging, init_logging, logging_status};
pub use model::external::{
    normalize_extra_data, validate_extra_data, ExternalIdentity, ExternalIdentityError,
};
pub use model::layer::{ExternalLayerConfig, Layer, LayerId, LayerValidationError};
pub use model::node::{Node, NodeId, NodeValidationError};
pub use repo::layer_repo::{LayerRepository, SqliteLayerRepository};
pub use repo::node_repo::{NodeRepository, SqliteNodeRepository};
pub use repo::{RepoError, RepoResult};
pub use service::node_service::{NodeMutation, NodeService};
pub use sync::connector::{
    ConnectorError, ConnectorOutcome, ConnectorRegistry, ConnectorRegistryError,
    ConnectorRequest, ConnectorResult, LayerConnector,
};
pub use sync::decision::{decide, decide_delete, SyncAction};
pub use sync::dispatcher::{DispatchError, SyncDispatcher};
pub use sync::hooks::{HookOutcome, LifecycleHooks};
pub use sync::job::{JobHandle, JobId, JobStatus, NewSyncJob, SyncJob, SyncOperation, SyncPayload};
pub use sync::queue::{JobQueue, QueueError, QueueResult, QueueStats, SqliteJobQueue};
pub use sync::worker::{spawn_workers, JobOutcome, SyncWorker, WorkerHandle};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
