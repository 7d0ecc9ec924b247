//! Managed session wrapper around an MQTT publish/subscribe connection.
//!
//! # Overview
//!
//! This crate maintains a single outbound broker connection behind a small
//! operation surface:
//!
//! - a connection lifecycle state machine (Disconnected → Connecting →
//!   Connected) with a retry-forever connect loop, stoppable only by an
//!   explicit disconnect
//! - a topic registry holding the intended subscription set, replayed
//!   against every fresh connection so broker-side subscriptions converge
//!   after reconnects
//! - a guarded, fire-and-forget publish that never raises to the caller
//! - an injected inbound dispatcher re-attached on every reconnect
//!
//! # Quick Start
//!
//! ```no_run
//! use mqtt_session::{MqttSession, RetryPolicy};
//!
//! # async fn run() {
//! let session = MqttSession::with_options(
//!     "mqtt://broker:1883",
//!     "dev-1",
//!     vec!["devices/+/telemetry".to_string()],
//!     RetryPolicy::default(),
//! );
//!
//! // Blocks until the broker accepts (or disconnect() is called elsewhere)
//! session.connect().await;
//!
//! session.publish("devices/dev-1/telemetry", br#"{"ok":true}"#).await;
//! session.disconnect().await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod testing;

pub use config::{ConfigError, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use session::{
    ConnectionState, InboundDispatcher, MqttSession, RetryPolicy, TopicRegistry,
};
