use crate::message::Headers;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Header carrying the JSON content type set by `publish_json`.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Content type of JSON payloads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type used when nothing else is known about the payload.
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Header carrying the partitioning key of a log-style record.
pub const KAFKA_KEY_HEADER: &str = "kafka.key";

/// Header carrying the partition of a log-style record.
pub const KAFKA_PARTITION_HEADER: &str = "kafka.partition";

/// Header carrying the offset of a delivered log-style record.
pub const KAFKA_OFFSET_HEADER: &str = "kafka.offset";

/// Highest priority honored by queue-style backends.
pub const MAX_PRIORITY: u8 = 9;

/// Per-publish directives. The default value means "use backend defaults".
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct PublishOptions {
    /// Headers sent with the message.
    pub headers: Headers,

    /// Durability hint.
    pub persistent: bool,

    /// Priority between 0 and 9. Values outside that range are ignored.
    pub priority: Option<u8>,

    /// Time to live.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Delay before delivery.
    #[serde(with = "humantime_serde")]
    pub delay: Option<Duration>,

    /// Content type of the payload.
    pub content_type: Option<String>,
}

impl PublishOptions {
    /// Returns the priority if it lies within the honored range.
    #[must_use]
    pub fn effective_priority(&self) -> Option<u8> {
        self.priority.filter(|priority| *priority <= MAX_PRIORITY)
    }

    /// Returns a copy with `headers` merged on top of the existing headers.
    #[must_use]
    pub fn merged_with(&self, headers: &Headers) -> Self {
        let mut merged = self.clone();
        merged
            .headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Per-subscription directives.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct SubscribeOptions {
    /// Durable queue name, queue group or consumer group id, depending on the backend.
    pub queue_name: Option<String>,

    /// Whether the subscription survives restarts.
    pub durable: bool,

    /// Whether the backend acknowledges messages on delivery.
    pub auto_ack: bool,

    /// Whether the subscription is exclusive to this consumer.
    pub exclusive: bool,

    /// Number of retries after the first failed handler invocation.
    pub max_retries: u32,

    /// Delay between retries.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Number of parallel delivery workers (at least one is always started).
    pub concurrency: usize,

    /// Cap on unacknowledged in-flight messages.
    pub prefetch_count: u16,

    /// Topic receiving messages whose retries are exhausted.
    pub dead_letter_topic: Option<String>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            queue_name: None,
            durable: true,
            auto_ack: false,
            exclusive: false,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            concurrency: 1,
            prefetch_count: 1,
            dead_letter_topic: None,
        }
    }
}

impl SubscribeOptions {
    /// Number of workers to start.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Topic creation directives.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TopicOptions {
    /// Whether the topic survives restarts.
    pub durable: bool,

    /// Whether the topic is removed once unused.
    pub auto_delete: bool,

    /// Whether the topic is exclusive to the creating connection.
    pub exclusive: bool,

    /// Backend-specific arguments, such as `partitions`.
    pub arguments: HashMap<String, serde_json::Value>,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
            exclusive: false,
            arguments: HashMap::new(),
        }
    }
}

impl TopicOptions {
    /// Reads an integer argument.
    #[must_use]
    pub fn integer_argument(&self, key: &str) -> Option<i64> {
        self.arguments.get(key).and_then(serde_json::Value::as_i64)
    }
}

/// Partitioning hints for log-style backends.
///
/// Hints travel as `kafka.key` / `kafka.partition` headers so existing
/// consumers keep working; they are only converted at that boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartitionHints {
    /// Record key used for partition assignment.
    pub key: Option<String>,

    /// Explicit partition.
    pub partition: Option<i32>,
}

impl PartitionHints {
    /// Reads hints from message headers. Unparseable partitions are ignored.
    #[must_use]
    pub fn from_headers(headers: &Headers) -> Self {
        Self {
            key: headers.get(KAFKA_KEY_HEADER).cloned(),
            partition: headers
                .get(KAFKA_PARTITION_HEADER)
                .and_then(|p| p.parse::<i32>().ok())
                .filter(|p| *p >= 0),
        }
    }

    /// Writes the hints into headers.
    pub fn apply_to(&self, headers: &mut Headers) {
        if let Some(key) = self.key.as_ref().filter(|k| !k.is_empty()) {
            headers.insert(KAFKA_KEY_HEADER.to_string(), key.clone());
        }

        if let Some(partition) = self.partition.filter(|p| *p >= 0) {
            headers.insert(KAFKA_PARTITION_HEADER.to_string(), partition.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_priority_is_ignored() {
        let options = PublishOptions {
            priority: Some(15),
            ..PublishOptions::default()
        };
        assert_eq!(options.effective_priority(), None);

        let options = PublishOptions {
            priority: Some(9),
            ..PublishOptions::default()
        };
        assert_eq!(options.effective_priority(), Some(9));
    }

    #[test]
    fn test_message_headers_win_on_merge() {
        let options = PublishOptions::default()
            .with_header("source", "global")
            .with_header("trace", "abc");

        let mut headers = Headers::new();
        headers.insert("source".to_string(), "message".to_string());

        let merged = options.merged_with(&headers);

        assert_eq!(merged.headers["source"], "message");
        assert_eq!(merged.headers["trace"], "abc");
    }

    #[test]
    fn test_partition_hints_round_trip_through_headers() {
        let hints = PartitionHints {
            key: Some("customer-42".to_string()),
            partition: Some(3),
        };

        let mut headers = Headers::new();
        hints.apply_to(&mut headers);

        assert_eq!(headers[KAFKA_KEY_HEADER], "customer-42");
        assert_eq!(headers[KAFKA_PARTITION_HEADER], "3");
        assert_eq!(PartitionHints::from_headers(&headers), hints);
    }

    #[test]
    fn test_negative_partition_is_not_a_hint() {
        let mut headers = Headers::new();
        headers.insert(KAFKA_PARTITION_HEADER.to_string(), "-1".to_string());

        assert_eq!(PartitionHints::from_headers(&headers).partition, None);
    }

    #[test]
    fn test_subscribe_options_deserialize_humantime() {
        let options: SubscribeOptions =
            serde_json::from_str(r#"{"max_retries": 2, "retry_delay": "10ms"}"#).unwrap();

        assert_eq!(options.max_retries, 2);
        assert_eq!(options.retry_delay, Duration::from_millis(10));
        assert!(options.durable);
        assert_eq!(options.worker_count(), 1);
    }
}
