//! Managed MQTT session.
//!
//! [`MqttSession`] is the public operation surface: connect, disconnect,
//! subscribe, unsubscribe, publish and is_connected. It composes the
//! connection controller (lifecycle state machine and retry loop) with the
//! topic registry (the intended topic set, replayed across reconnects) and
//! the injected inbound dispatcher.

use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod connection;
mod controller;
mod dispatcher;
mod registry;

pub use connection::{configure_mqtt_options, ConnectionState, RetryPolicy};
pub use dispatcher::{route_event, EventRoute, InboundDispatcher};
pub use registry::TopicRegistry;

use crate::config::SessionConfig;
use crate::error::SessionError;
use controller::ConnectionController;
use dispatcher::DispatcherSlot;

/// A managed session over a single broker connection.
///
/// Cheap to share behind an `Arc`; all operations take `&self`. `connect()`
/// is expected to run on its own task since it blocks until the broker
/// accepts, while the other operations fail fast on the current state.
pub struct MqttSession {
    controller: ConnectionController,
    registry: Arc<TopicRegistry>,
    dispatcher: Arc<DispatcherSlot>,
}

impl MqttSession {
    /// Create a session with the default retry policy and no standard topics.
    pub fn new(broker_url: &str, client_id: &str) -> Self {
        Self::with_options(broker_url, client_id, Vec::new(), RetryPolicy::default())
    }

    /// Create a session from loaded configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_options(
            &config.broker.url,
            &config.broker.client_id,
            config.session.standard_topics.clone(),
            RetryPolicy::new(config.session.retry_interval_ms),
        )
    }

    /// Create a session with explicit standard topics and retry policy.
    ///
    /// The standard topics seed the registry, so the first successful
    /// connect subscribes them and every reconnect keeps them subscribed.
    pub fn with_options(
        broker_url: &str,
        client_id: &str,
        standard_topics: Vec<String>,
        retry: RetryPolicy,
    ) -> Self {
        let registry = Arc::new(TopicRegistry::seeded(standard_topics));
        let dispatcher = Arc::new(DispatcherSlot::new());
        let controller = ConnectionController::new(
            broker_url.to_string(),
            client_id.to_string(),
            retry,
            registry.clone(),
            dispatcher.clone(),
        );

        Self {
            controller,
            registry,
            dispatcher,
        }
    }

    /// Register the inbound dispatcher.
    ///
    /// The dispatcher receives inbound messages and delivery
    /// acknowledgements for as long as the connection is up, and is
    /// re-attached automatically on every reconnect. Replacing it takes
    /// effect on the next inbound event.
    pub async fn set_dispatcher(&self, dispatcher: Arc<dyn InboundDispatcher>) {
        self.dispatcher.set(dispatcher).await;
    }

    /// Connect to the broker, retrying forever at the configured interval.
    ///
    /// Blocks until the broker accepts or [`disconnect`](Self::disconnect)
    /// is called from another task. Never returns an error; failures are
    /// logged. Calling while already connected is a logged no-op.
    pub async fn connect(&self) {
        self.controller.connect().await;
    }

    /// Stop the connect loop and close the connection if one is open.
    /// Idempotent; close errors are logged and ignored.
    pub async fn disconnect(&self) {
        self.controller.disconnect().await;
    }

    /// True iff the session currently holds a live broker connection.
    pub fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    /// Subscribe to a topic on the live connection.
    ///
    /// Fails with [`SessionError::NotConnected`] while the session is not
    /// connected; the registry is only mutated after the protocol subscribe
    /// succeeds. Subscribing an already-present topic re-issues the
    /// protocol subscribe (broker-idempotent) and leaves the set unchanged.
    pub async fn subscribe(&self, topic: &str) -> Result<(), SessionError> {
        if topic.is_empty() {
            return Err(SessionError::InvalidArgument("topic must not be empty"));
        }

        let Some(client) = self.controller.client().await else {
            return Err(SessionError::NotConnected {
                state: self.controller.state(),
            });
        };

        info!(topic = %topic, "subscribing");
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| SessionError::SubscribeFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        self.registry.insert(topic).await;
        Ok(())
    }

    /// Unsubscribe from a topic on the live connection.
    ///
    /// Fails with [`SessionError::NotConnected`] while not connected. Once
    /// the protocol unsubscribe succeeds the topic is removed from the
    /// registry; removing an absent topic is a no-op, not an error.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        if topic.is_empty() {
            return Err(SessionError::InvalidArgument("topic must not be empty"));
        }

        let Some(client) = self.controller.client().await else {
            return Err(SessionError::NotConnected {
                state: self.controller.state(),
            });
        };

        info!(topic = %topic, "unsubscribing");
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| SessionError::UnsubscribeFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })?;

        self.registry.remove(topic).await;
        Ok(())
    }

    /// Publish a payload to a topic, fire-and-forget.
    ///
    /// Never returns an error: a missing topic, a disconnected session or
    /// a transport failure are logged and the message is dropped. Callers
    /// that need a signal should poll [`is_connected`](Self::is_connected)
    /// first. An empty payload is legal and forwarded as-is (it clears a
    /// retained message at the broker). Delivery acknowledgements surface
    /// later through the dispatcher as diagnostic tokens.
    pub async fn publish(&self, topic: &str, payload: &[u8]) {
        if let Err(e) = self.try_publish(topic, payload).await {
            match e {
                SessionError::InvalidArgument(_) => {
                    error!(error = %e, "dropping publish")
                }
                SessionError::NotConnected { state } => {
                    warn!(?state, topic = %topic, "not connected to broker; dropping publish")
                }
                other => error!(error = %other, topic = %topic, "dropping publish"),
            }
        }
    }

    async fn try_publish(&self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        if topic.is_empty() {
            return Err(SessionError::InvalidArgument("topic must not be empty"));
        }

        let Some(client) = self.controller.client().await else {
            return Err(SessionError::NotConnected {
                state: self.controller.state(),
            });
        };

        debug!(topic = %topic, bytes = payload.len(), "publishing message");
        client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|e| SessionError::PublishFailed(Box::new(e)))?;

        Ok(())
    }

    /// Teardown hook for the host process. Must be invoked at shutdown;
    /// skipping it leaks the open connection.
    pub async fn shutdown(&self) {
        info!("session teardown requested");
        self.disconnect().await;
    }

    /// Snapshot of the intended topic set, mainly for diagnostics.
    pub async fn subscribed_topics(&self) -> Vec<String> {
        self.registry.snapshot().await
    }
}
