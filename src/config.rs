//! Configuration for the managed MQTT session.
//!
//! Only the fields the session layer itself consumes live here: the broker
//! locator, the client identity, the standard topic list and the retry
//! interval. Credentials are out of scope for this layer and have no fields.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// Broker section - the immutable connection identity.
///
/// Both fields are fixed at construction time; reconnecting under a
/// different identity is unsupported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL with protocol and port, e.g. `mqtt://broker:1883`
    pub url: String,
    /// Client identifier (must match [a-zA-Z0-9._-]+)
    pub client_id: String,
}

/// Session section - behavior of the session wrapper itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Topics auto-subscribed after the first successful connect and kept
    /// subscribed across reconnects.
    #[serde(default)]
    pub standard_topics: Vec<String>,
    /// Fixed delay between failed connect attempts (default: 10000 = 10s)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_retry_interval_ms() -> u64 {
    10_000
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            standard_topics: Vec::new(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid client id: {0}")]
    InvalidClientId(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.broker.client_id)?;

        if self.session.retry_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.session.standard_topics.iter().any(|t| t.is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "standard_topics must not contain empty topics".to_string(),
            ));
        }

        Ok(())
    }
}

/// Validate client identifier format.
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "client id '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
