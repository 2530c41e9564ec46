use crate::options::{
    JSON_CONTENT_TYPE, OCTET_STREAM_CONTENT_TYPE, PartitionHints, PublishOptions, SubscribeOptions,
    TopicOptions,
};

use std::time::Duration;

/// Topic argument naming the partition count of a log topic.
pub const PARTITIONS_ARGUMENT: &str = "partitions";

/// Topic argument naming the replication factor of a log topic.
pub const REPLICATION_FACTOR_ARGUMENT: &str = "replication-factor";

fn prefetch_for(concurrency: usize) -> u16 {
    u16::try_from(concurrency.max(1).saturating_mul(2)).unwrap_or(u16::MAX)
}

/// Transient binary payloads.
#[must_use]
pub fn default_publish_options() -> PublishOptions {
    PublishOptions {
        content_type: Some(OCTET_STREAM_CONTENT_TYPE.to_string()),
        ..PublishOptions::default()
    }
}

/// Persistent JSON payloads.
#[must_use]
pub fn json_publish_options() -> PublishOptions {
    PublishOptions {
        content_type: Some(JSON_CONTENT_TYPE.to_string()),
        persistent: true,
        ..PublishOptions::default()
    }
}

/// Worker queues: `concurrency` workers, twice as many in flight, patient retries.
#[must_use]
pub fn worker_subscribe_options(concurrency: usize) -> SubscribeOptions {
    SubscribeOptions {
        concurrency,
        prefetch_count: prefetch_for(concurrency),
        max_retries: 5,
        retry_delay: Duration::from_secs(10),
        ..SubscribeOptions::default()
    }
}

/// Persistent JSON records with optional key and partition hints.
#[must_use]
pub fn kafka_publish_options(key: Option<&str>, partition: Option<i32>) -> PublishOptions {
    let mut options = json_publish_options();

    PartitionHints {
        key: key.map(ToString::to_string),
        partition,
    }
    .apply_to(&mut options.headers);

    options
}

/// Consumer group subscription with manual offset handling.
#[must_use]
pub fn kafka_subscribe_options(consumer_group: &str, concurrency: usize) -> SubscribeOptions {
    SubscribeOptions {
        queue_name: Some(consumer_group.to_string()),
        concurrency,
        prefetch_count: prefetch_for(concurrency),
        max_retries: 3,
        retry_delay: Duration::from_secs(2),
        auto_ack: false,
        ..SubscribeOptions::default()
    }
}

/// Log topic with explicit partitioning.
#[must_use]
pub fn kafka_topic_options(partitions: i32, replication_factor: i32) -> TopicOptions {
    let mut options = TopicOptions::default();
    options
        .arguments
        .insert(PARTITIONS_ARGUMENT.to_string(), partitions.into());
    options.arguments.insert(
        REPLICATION_FACTOR_ARGUMENT.to_string(),
        replication_factor.into(),
    );
    options
}
