//! Node domain model.
//!
//! # Invariants
//! - A node belongs to exactly one layer.
//! - Coordinates are WGS84 degrees within their natural ranges.
//! - `external` is resolved when the node is loaded; `None` means no
//!   `nodes_external` row exists.

use crate::model::external::ExternalIdentity;
use crate::model::layer::{is_valid_slug, LayerId};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type NodeId = Uuid;

/// Validation errors for node writes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValidationError {
    NilId,
    NilLayerId,
    EmptyName,
    InvalidSlug(String),
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
}

impl Display for NodeValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "node id must not be nil"),
            Self::NilLayerId => write!(f, "node layer id must not be nil"),
            Self::EmptyName => write!(f, "node name must not be empty"),
            Self::InvalidSlug(slug) => write!(f, "node slug is invalid: `{slug}`"),
            Self::LatitudeOutOfRange(value) => {
                write!(f, "latitude {value} is outside -90..=90")
            }
            Self::LongitudeOutOfRange(value) => {
                write!(f, "longitude {value} is outside -180..=180")
            }
        }
    }
}

impl Error for NodeValidationError {}

/// Geo-located resource belonging to one layer.
///
/// Serialized as-is into `add`/`change` sync payloads, so connectors receive
/// a snapshot rather than a live reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub layer_id: LayerId,
    pub name: String,
    pub slug: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub external: Option<ExternalIdentity>,
}

impl Node {
    /// Creates a node with a generated id and no optional metadata.
    pub fn new(
        layer_id: LayerId,
        name: impl Into<String>,
        slug: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            layer_id,
            name: name.into(),
            slug: slug.into(),
            latitude,
            longitude,
            elevation: None,
            address: None,
            description: None,
            external: None,
        }
    }

    /// Returns the external id when the node has been synchronized.
    pub fn external_id(&self) -> Option<&str> {
        self.external
            .as_ref()
            .filter(|identity| identity.is_synchronized())
            .map(|identity| identity.external_id.as_str())
    }

    pub fn validate(&self) -> Result<(), NodeValidationError> {
        if self.id.is_nil() {
            return Err(NodeValidationError::NilId);
        }
        if self.layer_id.is_nil() {
            return Err(NodeValidationError::NilLayerId);
        }
        if self.name.trim().is_empty() {
            return Err(NodeValidationError::EmptyName);
        }
        if !is_valid_slug(&self.slug) {
            return Err(NodeValidationError::InvalidSlug(self.slug.clone()));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(NodeValidationError::LatitudeOutOfRange(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(NodeValidationError::LongitudeOutOfRange(self.longitude));
        }
        Ok(())
    }
}
