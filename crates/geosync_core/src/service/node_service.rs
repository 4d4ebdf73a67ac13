//! Catalog mutation service.
//!
//! # Responsibility
//! - Be the single place where nodes are created, updated and deleted.
//! - Fire lifecycle hooks around each mutation.
//!
//! # Invariants
//! - Create/update persist first, then fire the hook with the stored state.
//! - Delete fires `on_pre_delete` before the row (and its cascade-owned
//!   external identity) is removed. With the SQLite wiring the delete job
//!   and the row delete share a transaction, so a failed delete leaves no
//!   job behind.
//! - Hook outcomes are reported, never turned into errors.

use crate::config::SyncConfig;
use crate::model::external::ExternalIdentity;
use crate::model::layer::{ExternalLayerConfig, Layer, LayerId};
use crate::model::node::{Node, NodeId};
use crate::repo::layer_repo::{LayerRepository, SqliteLayerRepository};
use crate::repo::node_repo::{NodeRepository, SqliteNodeRepository};
use crate::repo::{RepoError, RepoResult};
use crate::sync::dispatcher::SyncDispatcher;
use crate::sync::hooks::{HookOutcome, LifecycleHooks};
use crate::sync::queue::{JobQueue, SqliteJobQueue};
use rusqlite::Connection;

/// Result of a node mutation together with what sync did about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMutation {
    pub node_id: NodeId,
    pub sync: HookOutcome,
}

/// Use-case service for catalog writes.
pub struct NodeService<N, L, Q>
where
    N: NodeRepository,
    L: LayerRepository,
    Q: JobQueue,
{
    nodes: N,
    layers: L,
    hooks: LifecycleHooks<Q>,
}

impl<'conn>
    NodeService<SqliteNodeRepository<'conn>, SqliteLayerRepository<'conn>, SqliteJobQueue<'conn>>
{
    /// Wires repositories, queue and hooks over one SQLite connection.
    pub fn sqlite(conn: &'conn Connection, config: &SyncConfig) -> Self {
        Self::new(
            SqliteNodeRepository::new(conn),
            SqliteLayerRepository::new(conn),
            LifecycleHooks::new(SyncDispatcher::new(
                SqliteJobQueue::new(conn),
                config.max_attempts,
            )),
        )
    }
}

impl<N, L, Q> NodeService<N, L, Q>
where
    N: NodeRepository,
    L: LayerRepository,
    Q: JobQueue,
{
    pub fn new(nodes: N, layers: L, hooks: LifecycleHooks<Q>) -> Self {
        Self {
            nodes,
            layers,
            hooks,
        }
    }

    pub fn create_layer(&self, layer: &Layer) -> RepoResult<LayerId> {
        self.layers.create_layer(layer)
    }

    pub fn get_layer(&self, id: LayerId) -> RepoResult<Option<Layer>> {
        self.layers.get_layer(id)
    }

    pub fn list_layers(&self) -> RepoResult<Vec<Layer>> {
        self.layers.list_layers()
    }

    pub fn set_layer_external(&self, id: LayerId, is_external: bool) -> RepoResult<()> {
        self.layers.set_layer_external(id, is_external)
    }

    pub fn set_external_config(&self, config: &ExternalLayerConfig) -> RepoResult<()> {
        self.layers.save_external_config(config)
    }

    pub fn clear_external_config(&self, id: LayerId) -> RepoResult<()> {
        self.layers.clear_external_config(id)
    }

    /// Inserts a node, then fires `on_create`.
    pub fn create_node(&self, node: &Node) -> RepoResult<NodeMutation> {
        let node_id = self.nodes.create_node(node)?;
        let (stored, layer) = self.load_with_layer(node_id)?;
        let sync = self.hooks.on_create(&stored, &layer);
        Ok(NodeMutation { node_id, sync })
    }

    /// Updates a node, then fires `on_update`.
    pub fn update_node(&self, node: &Node) -> RepoResult<NodeMutation> {
        self.nodes.update_node(node)?;
        let (stored, layer) = self.load_with_layer(node.id)?;
        let sync = self.hooks.on_update(&stored, &layer);
        Ok(NodeMutation {
            node_id: node.id,
            sync,
        })
    }

    /// Fires `on_pre_delete`, then deletes the node.
    pub fn delete_node(&self, id: NodeId) -> RepoResult<NodeMutation> {
        let sync = self.nodes.delete_node_with(id, || {
            let (stored, layer) = self.load_with_layer(id)?;
            Ok(self.hooks.on_pre_delete(&stored, &layer))
        })?;
        Ok(NodeMutation { node_id: id, sync })
    }

    pub fn get_node(&self, id: NodeId) -> RepoResult<Option<Node>> {
        self.nodes.get_node(id)
    }

    pub fn list_layer_nodes(&self, layer_id: LayerId) -> RepoResult<Vec<Node>> {
        self.nodes.list_layer_nodes(layer_id)
    }

    /// Manually sets the external identity of a node.
    ///
    /// Rejects `extra_data` that is not JSON after quote normalization.
    pub fn save_external_identity(
        &self,
        node_id: NodeId,
        identity: &ExternalIdentity,
    ) -> RepoResult<ExternalIdentity> {
        self.nodes.save_external_identity(node_id, identity)
    }

    fn load_with_layer(&self, id: NodeId) -> RepoResult<(Node, Layer)> {
        let node = self.nodes.get_node(id)?.ok_or(RepoError::NodeNotFound(id))?;
        let layer = self
            .layers
            .get_layer(node.layer_id)?
            .ok_or(RepoError::LayerNotFound(node.layer_id))?;
        Ok((node, layer))
    }
}
