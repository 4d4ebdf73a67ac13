//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls and lifecycle hooks into use-case APIs.
//! - Keep callers decoupled from storage and queue details.

pub mod node_service;
