//! Catalog domain model.
//!
//! # Responsibility
//! - Define layers, nodes and their optional external-system links.
//! - Own write-time validation for every persisted shape.
//!
//! # Invariants
//! - Optional one-to-one relations are explicit `Option` fields resolved at
//!   load time, never probed dynamically.
//! - `ExternalIdentity::extra_data` is empty or valid JSON when persisted.

pub mod external;
pub mod layer;
pub mod node;
