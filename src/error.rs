//! Error types for the session layer.
//!
//! The propagation policy is deliberately uneven: subscribe and unsubscribe
//! return their failures to the immediate caller, while the connect, publish
//! and disconnect paths log and degrade to a no-op. See the method docs on
//! [`crate::session::MqttSession`] for the caller-facing contract.

use crate::config::ConfigError;
use crate::session::ConnectionState;
use thiserror::Error;

/// Errors produced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("subscribe failed for topic '{topic}'")]
    SubscribeFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unsubscribe failed for topic '{topic}'")]
    UnsubscribeFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("publish failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
