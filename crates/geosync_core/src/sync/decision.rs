//! Pure sync decision rules.
//!
//! # Invariants
//! - No action for layers that are not external.
//! - No action for external layers without a config or a connector id.
//! - Deletes need a non-empty external id; otherwise there is nothing to
//!   remove remotely.

use crate::model::layer::{ExternalLayerConfig, Layer};
use crate::model::node::Node;
use crate::sync::job::SyncOperation;

/// Operation decided for a node change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Add,
    Change,
    /// Carries the external id read before the node is destroyed.
    Delete { external_id: String },
}

impl SyncAction {
    pub fn operation(&self) -> SyncOperation {
        match self {
            Self::Add => SyncOperation::Add,
            Self::Change => SyncOperation::Change,
            Self::Delete { .. } => SyncOperation::Delete,
        }
    }
}

/// Decides the action for a node that was just created or updated.
pub fn decide(node: &Node, layer: &Layer, is_new: bool) -> Option<SyncAction> {
    sync_target(node, layer)?;
    Some(if is_new {
        SyncAction::Add
    } else {
        SyncAction::Change
    })
}

/// Decides the action for a node that is about to be deleted.
pub fn decide_delete(node: &Node, layer: &Layer) -> Option<SyncAction> {
    sync_target(node, layer)?;
    let external_id = node.external_id()?;
    Some(SyncAction::Delete {
        external_id: external_id.to_string(),
    })
}

/// Returns the layer config to sync against, if the layer qualifies.
///
/// A layer that does not own `node` never qualifies.
pub fn sync_target<'a>(node: &Node, layer: &'a Layer) -> Option<&'a ExternalLayerConfig> {
    if !layer.is_external || node.layer_id != layer.id {
        return None;
    }
    let config = layer.external.as_ref()?;
    config.connector_id()?;
    Some(config)
}
