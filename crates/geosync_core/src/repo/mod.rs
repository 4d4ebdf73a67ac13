//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for the catalog.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Write paths validate models before SQL mutations.
//! - `ExternalIdentity` rows are only written after `clean()` succeeds.
//! - Repository APIs return semantic errors (`*NotFound`) in addition to DB
//!   transport errors.

use crate::db::DbError;
use crate::model::external::ExternalIdentityError;
use crate::model::layer::{LayerId, LayerValidationError};
use crate::model::node::{NodeId, NodeValidationError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod layer_repo;
pub mod node_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for catalog persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    LayerValidation(LayerValidationError),
    NodeValidation(NodeValidationError),
    ExternalIdentity(ExternalIdentityError),
    Db(DbError),
    LayerNotFound(LayerId),
    NodeNotFound(NodeId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LayerValidation(err) => write!(f, "{err}"),
            Self::NodeValidation(err) => write!(f, "{err}"),
            Self::ExternalIdentity(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::LayerNotFound(id) => write!(f, "layer not found: {id}"),
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted catalog data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::LayerValidation(err) => Some(err),
            Self::NodeValidation(err) => Some(err),
            Self::ExternalIdentity(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::LayerNotFound(_) | Self::NodeNotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<LayerValidationError> for RepoError {
    fn from(value: LayerValidationError) -> Self {
        Self::LayerValidation(value)
    }
}

impl From<NodeValidationError> for RepoError {
    fn from(value: NodeValidationError) -> Self {
        Self::NodeValidation(value)
    }
}

impl From<ExternalIdentityError> for RepoError {
    fn from(value: ExternalIdentityError) -> Self {
        Self::ExternalIdentity(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
