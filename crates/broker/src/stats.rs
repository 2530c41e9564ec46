use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Broker statistics. Backends fill in what they can and leave the rest zeroed.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BrokerStats {
    /// Number of connected clients.
    pub connected_clients: u32,

    /// Messages published through this broker instance.
    pub messages_published: u64,

    /// Messages consumed by this broker instance.
    pub messages_consumed: u64,

    /// Per-topic statistics.
    pub topics: Vec<TopicStats>,

    /// Backend-specific statistics.
    pub custom: HashMap<String, serde_json::Value>,
}

/// Statistics for a single topic.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    /// Topic name.
    pub name: String,

    /// Messages published to the topic.
    pub messages_published: u64,

    /// Messages consumed from the topic.
    pub messages_consumed: u64,

    /// Active subscribers.
    pub subscribers: u32,

    /// Messages waiting to be consumed.
    pub pending_messages: u64,
}

/// Published/consumed counters shared between an adapter and its workers.
#[derive(Debug, Default)]
pub struct Counters {
    published: AtomicU64,
    consumed: AtomicU64,
}

impl Counters {
    /// Records a published message.
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a consumed message.
    pub fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages published so far.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Messages consumed so far.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// Fills the counter fields of `stats`.
    pub fn fill(&self, stats: &mut BrokerStats) {
        stats.messages_published = self.published();
        stats.messages_consumed = self.consumed();
    }
}
