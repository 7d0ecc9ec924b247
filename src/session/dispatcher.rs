//! Inbound event routing and the dispatcher capability seam.
//!
//! The dispatcher is an external collaborator: the session only promises to
//! invoke it with inbound messages and delivery acknowledgements for as long
//! as a connection is up. It is read through a settable slot on every event,
//! so a reconnect re-attaches whatever dispatcher is currently registered -
//! implementations must not assume connect-once semantics.

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Capability invoked with inbound traffic on the live connection.
#[async_trait]
pub trait InboundDispatcher: Send + Sync {
    /// An application message arrived on a subscribed topic.
    async fn message_arrived(&self, topic: &str, payload: &[u8]);

    /// The broker acknowledged an earlier publish. The token is the
    /// broker-assigned packet id, useful for diagnostics only.
    async fn delivery_complete(&self, token: u16);
}

/// Routing decisions for transport events.
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageArrived { topic: String, payload: Vec<u8> },
    /// Broker acknowledged an outbound message
    DeliveryConfirmed { token: u16 },
    /// Broker closed the connection
    BrokerDisconnect,
    /// Subscription confirmed by the broker
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    Infrastructure(String),
    /// Outgoing event (handled by the transport)
    Outgoing,
}

/// Route a transport event to a session-level decision (pure function).
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            Packet::Publish(publish) => EventRoute::MessageArrived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.to_vec(),
            },
            Packet::PubAck(ack) => EventRoute::DeliveryConfirmed { token: ack.pkid },
            Packet::Disconnect(_) => EventRoute::BrokerDisconnect,
            Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
            },
            other => EventRoute::Infrastructure(format!("{other:?}")),
        },
        Event::Outgoing(_) => EventRoute::Outgoing,
    }
}

/// Settable slot the supervisor reads on every inbound event.
#[derive(Default)]
pub struct DispatcherSlot {
    inner: Mutex<Option<Arc<dyn InboundDispatcher>>>,
}

impl DispatcherSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the dispatcher.
    pub async fn set(&self, dispatcher: Arc<dyn InboundDispatcher>) {
        *self.inner.lock().await = Some(dispatcher);
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Forward an inbound message to the registered dispatcher, if any.
    pub async fn forward_message(&self, topic: &str, payload: &[u8]) {
        let dispatcher = self.inner.lock().await.clone();
        match dispatcher {
            Some(dispatcher) => dispatcher.message_arrived(topic, payload).await,
            None => debug!(topic = %topic, "no dispatcher registered - inbound message dropped"),
        }
    }

    /// Forward a delivery acknowledgement to the registered dispatcher, if any.
    pub async fn forward_delivery(&self, token: u16) {
        let dispatcher = self.inner.lock().await.clone();
        if let Some(dispatcher) = dispatcher {
            dispatcher.delivery_complete(token).await;
        }
    }
}
