//! Sync runtime configuration.
//!
//! # Responsibility
//! - Provide defaults for retry, timeout and polling behavior.
//! - Parse overrides from JSON and reject unusable values.
//!
//! # Invariants
//! - Every field has a default, so `{}` is a complete configuration.
//! - `validate()` runs on every load path.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read sync config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse sync config: {err}"),
            Self::Invalid(message) => write!(f, "invalid sync config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Tunables for dispatch and worker execution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Attempts per job before it is dead-lettered.
    pub max_attempts: u32,
    /// First retry delay; doubled on each further attempt.
    pub base_backoff_ms: u64,
    /// Upper bound for the retry delay.
    pub max_backoff_ms: u64,
    /// Bound for a single connector call.
    pub call_timeout_ms: u64,
    /// Idle sleep between empty queue polls.
    pub poll_interval_ms: u64,
    /// Running jobs claimed longer ago than this are handed out again.
    pub stale_lease_ms: u64,
    /// Worker threads started by `spawn_workers`.
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            call_timeout_ms: 10_000,
            poll_interval_ms: 500,
            stale_lease_ms: 300_000,
            workers: 1,
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(value: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(value).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "base_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.base_backoff_ms, self.max_backoff_ms
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("call_timeout_ms must be positive".to_string()));
        }
        if self.stale_lease_ms <= self.call_timeout_ms {
            return Err(ConfigError::Invalid(
                "stale_lease_ms must exceed call_timeout_ms".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Delay before the next attempt once `attempts` attempts have failed.
    pub fn backoff_ms(&self, attempts: u32) -> u64 {
        let exponent = attempts.saturating_sub(1).min(32);
        self.base_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
