//! External-layer synchronization.
//!
//! # Responsibility
//! - Decide when a node change must reach an external system.
//! - Queue the change durably without blocking the write path.
//! - Deliver queued changes to layer connectors with retry.
//!
//! # Invariants
//! - Jobs for one node are delivered in enqueue order.
//! - Sync failures never fail or roll back the node mutation.

pub mod connector;
pub mod decision;
pub mod dispatcher;
pub mod hooks;
pub mod job;
pub mod queue;
pub mod worker;
