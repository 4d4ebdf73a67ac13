//! External identity of a node and its `extra_data` validation gate.
//!
//! # Invariants
//! - `extra_data` is either empty or valid JSON after quote normalization.
//! - Validation happens before persistence, never on read.
//!
//! The `'` -> `"` repair is lossy: a string value that legitimately contains
//! an apostrophe is corrupted by it. It is kept so records written by older
//! editors still load.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const INVALID_JSON_MESSAGE: &str = "The specified configuration is not valid JSON";

/// Validation errors for `ExternalIdentity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalIdentityError {
    /// `extra_data` is not valid JSON even after quote normalization.
    InvalidConfigurationFormat { message: String },
}

impl Display for ExternalIdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfigurationFormat { message } => write!(f, "{message}"),
        }
    }
}

impl Error for ExternalIdentityError {}

/// Link between a node and the record that represents it in an external
/// system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Identifier assigned by the external system. Empty until the node has
    /// been synchronized at least once.
    pub external_id: String,
    /// Opaque JSON blob describing the external record.
    pub extra_data: String,
}

impl ExternalIdentity {
    pub fn new(external_id: impl Into<String>, extra_data: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            extra_data: extra_data.into(),
        }
    }

    /// Returns whether the external system has assigned an id.
    ///
    /// Any non-empty id counts, whitespace included; ids are opaque.
    pub fn is_synchronized(&self) -> bool {
        !self.external_id.is_empty()
    }

    /// Checks `extra_data` without modifying it.
    pub fn validate(&self) -> Result<(), ExternalIdentityError> {
        validate_extra_data(&self.extra_data)
    }

    /// Validates and rewrites `extra_data` into its normalized form.
    ///
    /// This is the pre-save gate: repositories call it before writing.
    pub fn clean(&mut self) -> Result<(), ExternalIdentityError> {
        self.extra_data = normalize_extra_data(&self.extra_data)?;
        Ok(())
    }
}

/// Validates an `extra_data` blob.
///
/// Empty input is valid. Non-empty input must parse as JSON once every `'`
/// has been replaced with `"`.
pub fn validate_extra_data(extra_data: &str) -> Result<(), ExternalIdentityError> {
    normalize_extra_data(extra_data).map(|_| ())
}

/// Returns the normalized `extra_data` text that should be persisted.
pub fn normalize_extra_data(extra_data: &str) -> Result<String, ExternalIdentityError> {
    if extra_data.is_empty() {
        return Ok(String::new());
    }

    let normalized = extra_data.replace('\'', "\"");
    match serde_json::from_str::<serde_json::Value>(&normalized) {
        Ok(_) => Ok(normalized),
        Err(_) => Err(ExternalIdentityError::InvalidConfigurationFormat {
            message: INVALID_JSON_MESSAGE.to_string(),
        }),
    }
}
