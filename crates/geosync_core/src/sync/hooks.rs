//! Node lifecycle hooks.
//!
//! # Responsibility
//! - Turn node create/update/pre-delete events into sync jobs.
//!
//! # Invariants
//! - Hooks never fail the mutation that fired them; dispatch problems come
//!   back as `HookOutcome::DispatchFailed`.
//! - `on_pre_delete` must run while the node and its external identity are
//!   still stored, because the delete job needs the external id.

use crate::model::layer::Layer;
use crate::model::node::Node;
use crate::sync::decision::{decide, decide_delete, sync_target, SyncAction};
use crate::sync::dispatcher::SyncDispatcher;
use crate::sync::job::JobHandle;
use crate::sync::queue::JobQueue;
use log::{debug, warn};

/// What a hook did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// No sync required for this node/layer.
    Skipped,
    /// A job was queued.
    Enqueued(JobHandle),
    /// Sync was required but the job could not be queued.
    DispatchFailed(String),
}

impl HookOutcome {
    pub fn job(&self) -> Option<&JobHandle> {
        match self {
            Self::Enqueued(handle) => Some(handle),
            Self::Skipped | Self::DispatchFailed(_) => None,
        }
    }
}

/// Entry points called by the storage-mutation component.
pub struct LifecycleHooks<Q: JobQueue> {
    dispatcher: SyncDispatcher<Q>,
}

impl<Q: JobQueue> LifecycleHooks<Q> {
    pub fn new(dispatcher: SyncDispatcher<Q>) -> Self {
        Self { dispatcher }
    }

    /// Call after `node` has been inserted.
    pub fn on_create(&self, node: &Node, layer: &Layer) -> HookOutcome {
        self.fire("on_create", node, layer, decide(node, layer, true))
    }

    /// Call after `node` has been updated.
    pub fn on_update(&self, node: &Node, layer: &Layer) -> HookOutcome {
        self.fire("on_update", node, layer, decide(node, layer, false))
    }

    /// Call before `node` is deleted.
    pub fn on_pre_delete(&self, node: &Node, layer: &Layer) -> HookOutcome {
        self.fire("on_pre_delete", node, layer, decide_delete(node, layer))
    }

    fn fire(
        &self,
        hook: &str,
        node: &Node,
        layer: &Layer,
        action: Option<SyncAction>,
    ) -> HookOutcome {
        let (Some(action), Some(layer_config)) = (action, sync_target(node, layer)) else {
            debug!(
                "event=sync_hook module=sync status=skipped hook={} layer_id={}",
                hook, layer.id
            );
            return HookOutcome::Skipped;
        };

        match self.dispatcher.dispatch(&action, node, layer_config) {
            Ok(handle) => HookOutcome::Enqueued(handle),
            Err(err) => {
                warn!(
                    "event=sync_hook module=sync status=dispatch_failed hook={} layer_id={} operation={}",
                    hook,
                    layer.id,
                    action.operation()
                );
                HookOutcome::DispatchFailed(err.to_string())
            }
        }
    }
}
