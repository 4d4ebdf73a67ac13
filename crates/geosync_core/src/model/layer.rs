//! Layer domain model.
//!
//! # Responsibility
//! - Describe named groupings of nodes.
//! - Carry the optional external-system configuration of a layer.
//!
//! # Invariants
//! - `slug` is lowercase ASCII words joined by single dashes.
//! - `ExternalLayerConfig::config` is empty or valid JSON.
//! - A layer only takes part in synchronization when `is_external` is set
//!   and its config names a connector.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type LayerId = Uuid;

static SLUG_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").ok());

/// Validation errors for layer writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerValidationError {
    NilId,
    EmptyName,
    InvalidSlug(String),
    ConfigLayerMismatch { layer_id: LayerId, config_layer_id: LayerId },
    InvalidConnectorConfig,
}

impl Display for LayerValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "layer id must not be nil"),
            Self::EmptyName => write!(f, "layer name must not be empty"),
            Self::InvalidSlug(slug) => write!(f, "layer slug is invalid: `{slug}`"),
            Self::ConfigLayerMismatch {
                layer_id,
                config_layer_id,
            } => write!(
                f,
                "external config belongs to layer {config_layer_id}, not {layer_id}"
            ),
            Self::InvalidConnectorConfig => {
                write!(f, "external layer configuration is not valid JSON")
            }
        }
    }
}

impl Error for LayerValidationError {}

/// External-system settings attached to one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLayerConfig {
    pub layer_id: LayerId,
    /// Connector id used to look up the `LayerConnector`. `None` means the
    /// layer is external but not wired to any connector yet.
    pub interoperability: Option<String>,
    /// Opaque JSON passed through to the connector.
    pub config: String,
}

impl ExternalLayerConfig {
    pub fn new(layer_id: LayerId, interoperability: Option<String>) -> Self {
        Self {
            layer_id,
            interoperability,
            config: String::new(),
        }
    }

    /// Returns the connector id, treating blank values as unset.
    pub fn connector_id(&self) -> Option<&str> {
        self.interoperability
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn validate(&self) -> Result<(), LayerValidationError> {
        if self.config.is_empty() {
            return Ok(());
        }
        serde_json::from_str::<serde_json::Value>(&self.config)
            .map(|_| ())
            .map_err(|_| LayerValidationError::InvalidConnectorConfig)
    }
}

/// Named grouping of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub slug: String,
    /// Marks nodes of this layer as mirrored to/from an external system.
    pub is_external: bool,
    /// Loaded together with the layer; `None` when no row exists.
    pub external: Option<ExternalLayerConfig>,
}

impl Layer {
    /// Creates an internal layer with a generated id.
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: slug.into(),
            is_external: false,
            external: None,
        }
    }

    /// Marks the layer as external and wires it to `connector_id`.
    pub fn with_connector(mut self, connector_id: impl Into<String>) -> Self {
        self.is_external = true;
        self.external = Some(ExternalLayerConfig::new(
            self.id,
            Some(connector_id.into()),
        ));
        self
    }

    pub fn validate(&self) -> Result<(), LayerValidationError> {
        if self.id.is_nil() {
            return Err(LayerValidationError::NilId);
        }
        if self.name.trim().is_empty() {
            return Err(LayerValidationError::EmptyName);
        }
        if !is_valid_slug(&self.slug) {
            return Err(LayerValidationError::InvalidSlug(self.slug.clone()));
        }
        if let Some(external) = &self.external {
            if external.layer_id != self.id {
                return Err(LayerValidationError::ConfigLayerMismatch {
                    layer_id: self.id,
                    config_layer_id: external.layer_id,
                });
            }
            external.validate()?;
        }
        Ok(())
    }
}

/// Returns whether `value` is a valid layer or node slug.
pub fn is_valid_slug(value: &str) -> bool {
    SLUG_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(value))
}
