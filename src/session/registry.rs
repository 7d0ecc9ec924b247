//! Bookkeeping for the intended topic set.
//!
//! The registry tracks which topics the process wants to be subscribed to.
//! It is mutated only through the facade's subscribe/unsubscribe (which are
//! rejected while not connected, so the set is frozen during downtime) and
//! read by the controller when it replays subscriptions against a fresh
//! connection.

use std::collections::BTreeSet;
use tokio::sync::Mutex;

/// The intended topic set, replayed against every fresh connection.
///
/// Backed by an ordered set so replay order is deterministic.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: Mutex<BTreeSet<String>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the configured standard topics.
    pub fn seeded<I>(topics: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            topics: Mutex::new(topics.into_iter().collect()),
        }
    }

    /// Add a topic. Returns false if it was already present.
    pub async fn insert(&self, topic: &str) -> bool {
        self.topics.lock().await.insert(topic.to_string())
    }

    /// Remove a topic. Removing an absent topic is a no-op returning false.
    pub async fn remove(&self, topic: &str) -> bool {
        self.topics.lock().await.remove(topic)
    }

    pub async fn contains(&self, topic: &str) -> bool {
        self.topics.lock().await.contains(topic)
    }

    /// Current contents in replay order.
    pub async fn snapshot(&self) -> Vec<String> {
        self.topics.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.topics.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.topics.lock().await.is_empty()
    }
}
