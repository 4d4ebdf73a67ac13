//! Layer connector SPI and the in-process connector registry.
//!
//! A connector performs the real remote add/change/delete for one external
//! system. Layers select their connector through
//! `ExternalLayerConfig::interoperability`.

use crate::model::layer::ExternalLayerConfig;
use crate::sync::job::{JobId, SyncOperation, SyncPayload};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Request handed to a connector for one job attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorRequest {
    pub job_id: JobId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub operation: SyncOperation,
    pub layer: ExternalLayerConfig,
    pub payload: SyncPayload,
}

/// Result of a successful remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorOutcome {
    /// Id assigned by the external system, reported on `add`.
    pub external_id: Option<String>,
    /// Replacement `extra_data` for the node's external identity.
    pub extra_data: Option<String>,
}

impl ConnectorOutcome {
    pub fn with_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            extra_data: None,
        }
    }
}

/// Failure of one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Remote system could not be reached. Retryable.
    Unreachable(String),
    /// Call did not finish within the configured timeout. Retryable.
    Timeout { after_ms: u64 },
    /// Remote system refused the payload. Permanent.
    Rejected(String),
}

impl ConnectorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout { .. })
    }

    /// Stable code used in logs and `sync_jobs.last_error`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "connector_unreachable",
            Self::Timeout { .. } => "connector_timeout",
            Self::Rejected(_) => "connector_rejected",
        }
    }
}

impl Display for ConnectorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(message) => write!(f, "connector unreachable: {message}"),
            Self::Timeout { after_ms } => write!(f, "connector timed out after {after_ms} ms"),
            Self::Rejected(message) => write!(f, "connector rejected payload: {message}"),
        }
    }
}

impl Error for ConnectorError {}

/// External-system specific synchronization adapter.
///
/// Implementations are called from worker threads and must not assume the
/// node still exists locally.
pub trait LayerConnector: Send + Sync {
    fn connector_id(&self) -> &str;
    fn push(&self, request: &ConnectorRequest) -> ConnectorResult<ConnectorOutcome>;
}

/// Connector registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorRegistryError {
    InvalidConnectorId(String),
    DuplicateConnectorId(String),
}

impl Display for ConnectorRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConnectorId(value) => write!(f, "connector id is invalid: {value}"),
            Self::DuplicateConnectorId(value) => {
                write!(f, "connector id already registered: {value}")
            }
        }
    }
}

impl Error for ConnectorRegistryError {}

/// Connectors available to sync workers, keyed by connector id.
///
/// Built once at startup and shared read-only across workers.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn LayerConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        connector: Arc<dyn LayerConnector>,
    ) -> Result<(), ConnectorRegistryError> {
        let connector_id = connector.connector_id().trim().to_string();
        if !is_valid_connector_id(&connector_id) {
            return Err(ConnectorRegistryError::InvalidConnectorId(connector_id));
        }
        if self.connectors.contains_key(connector_id.as_str()) {
            return Err(ConnectorRegistryError::DuplicateConnectorId(connector_id));
        }

        self.connectors.insert(connector_id, connector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Returns sorted connector ids.
    pub fn connector_ids(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    pub fn get(&self, connector_id: &str) -> Option<Arc<dyn LayerConnector>> {
        self.connectors.get(connector_id.trim()).cloned()
    }

    /// Returns the connector a layer is wired to.
    pub fn resolve(&self, layer: &ExternalLayerConfig) -> Option<Arc<dyn LayerConnector>> {
        self.get(layer.connector_id()?)
    }
}

fn is_valid_connector_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::{
        ConnectorError, ConnectorOutcome, ConnectorRegistry, ConnectorRegistryError,
        ConnectorRequest, ConnectorResult, LayerConnector,
    };
    use crate::model::layer::ExternalLayerConfig;
    use std::sync::Arc;
    use uuid::Uuid;

    struct NoopConnector {
        id: String,
    }

    impl NoopConnector {
        fn new(id: &str) -> Self {
            Self { id: id.to_string() }
        }
    }

    impl LayerConnector for NoopConnector {
        fn connector_id(&self) -> &str {
            &self.id
        }

        fn push(&self, _request: &ConnectorRequest) -> ConnectorResult<ConnectorOutcome> {
            Ok(ConnectorOutcome::default())
        }
    }

    #[test]
    fn registers_and_resolves_by_layer_config() {
        let mut registry = ConnectorRegistry::new();
        registry
            .register(Arc::new(NoopConnector::new("openwisp")))
            .expect("connector should register");
        assert_eq!(registry.len(), 1);

        let config = ExternalLayerConfig::new(Uuid::new_v4(), Some(" openwisp ".to_string()));
        let connector = registry.resolve(&config).expect("connector should resolve");
        assert_eq!(connector.connector_id(), "openwisp");

        let unset = ExternalLayerConfig::new(Uuid::new_v4(), None);
        assert!(registry.resolve(&unset).is_none());
    }

    #[test]
    fn rejects_invalid_or_duplicate_ids() {
        let mut registry = ConnectorRegistry::new();
        assert!(matches!(
            registry.register(Arc::new(NoopConnector::new("Open WISP"))),
            Err(ConnectorRegistryError::InvalidConnectorId(_))
        ));
        assert!(matches!(
            registry.register(Arc::new(NoopConnector::new("  "))),
            Err(ConnectorRegistryError::InvalidConnectorId(_))
        ));

        registry
            .register(Arc::new(NoopConnector::new("openwisp")))
            .expect("first registration");
        assert!(matches!(
            registry.register(Arc::new(NoopConnector::new("openwisp"))),
            Err(ConnectorRegistryError::DuplicateConnectorId(_))
        ));
        assert_eq!(registry.connector_ids(), vec!["openwisp".to_string()]);
    }

    #[test]
    fn retryability_follows_error_kind() {
        assert!(ConnectorError::Unreachable("dns".to_string()).is_retryable());
        assert!(ConnectorError::Timeout { after_ms: 10 }.is_retryable());
        assert!(!ConnectorError::Rejected("bad geometry".to_string()).is_retryable());
    }
}
