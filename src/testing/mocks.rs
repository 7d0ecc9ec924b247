//! Mock implementations for testing
//!
//! Provides a recording [`InboundDispatcher`] so dispatcher wiring can be
//! tested without a broker.

use crate::session::InboundDispatcher;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type ReceivedMessage = (String, Vec<u8>);

/// Dispatcher that records everything it is invoked with.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    messages: Arc<Mutex<Vec<ReceivedMessage>>>,
    tokens: Arc<Mutex<Vec<u16>>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn received(&self) -> Vec<ReceivedMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn delivery_tokens(&self) -> Vec<u16> {
        self.tokens.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.messages.lock().await.clear();
        self.tokens.lock().await.clear();
    }
}

#[async_trait]
impl InboundDispatcher for RecordingDispatcher {
    async fn message_arrived(&self, topic: &str, payload: &[u8]) {
        self.messages
            .lock()
            .await
            .push((topic.to_string(), payload.to_vec()));
    }

    async fn delivery_complete(&self, token: u16) {
        self.tokens.lock().await.push(token);
    }
}
