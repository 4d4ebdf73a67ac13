//! Sync job shapes shared by the dispatcher, the queue and the worker.
//!
//! # Invariants
//! - `add`/`change` jobs carry a full node snapshot.
//! - `delete` jobs carry only the external id captured before the node row
//!   was removed.

use crate::model::layer::ExternalLayerConfig;
use crate::model::node::Node;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub type JobId = i64;

/// Operation a connector is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Add,
    Change,
    Delete,
}

impl SyncOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(Self::Add),
            "change" => Some(Self::Change),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for SyncOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-contained job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SyncPayload {
    /// Node state at enqueue time.
    Node(Node),
    /// External id of a node that no longer exists locally.
    ExternalId(String),
}

impl SyncPayload {
    /// Returns whether this payload shape is valid for `operation`.
    pub fn fits(&self, operation: SyncOperation) -> bool {
        matches!(
            (self, operation),
            (Self::Node(_), SyncOperation::Add | SyncOperation::Change)
                | (Self::ExternalId(_), SyncOperation::Delete)
        )
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            Self::ExternalId(_) => None,
        }
    }
}

/// Queue lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Dead,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// Job as handed to the queue by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncJob {
    /// Jobs sharing a key are delivered in enqueue order. The node id.
    pub ordering_key: String,
    pub operation: SyncOperation,
    pub layer_config: ExternalLayerConfig,
    pub payload: SyncPayload,
    pub max_attempts: u32,
}

/// Persisted job row.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncJob {
    pub id: JobId,
    pub ordering_key: String,
    pub operation: SyncOperation,
    pub layer_config: ExternalLayerConfig,
    pub payload: SyncPayload,
    pub status: JobStatus,
    /// Number of times the job has been claimed, including the current run.
    pub attempts: u32,
    pub max_attempts: u32,
    pub available_at_ms: i64,
    pub claimed_at_ms: Option<i64>,
    pub last_error: Option<String>,
}

/// Receipt returned once a job has been durably queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub ordering_key: String,
    pub operation: SyncOperation,
}
