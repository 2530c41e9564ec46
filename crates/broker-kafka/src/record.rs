use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_broker::{
    CONTENT_TYPE_HEADER, Error, Headers, KAFKA_KEY_HEADER, KAFKA_OFFSET_HEADER,
    KAFKA_PARTITION_HEADER, Message, PartitionHints, PublishOptions, Result,
};
use rdkafka::message::{Header, Headers as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

/// Where a delivered record sits in its partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Builds the envelope for a consumed record.
pub fn to_message<M>(record: &M) -> Message
where
    M: rdkafka::Message,
{
    let mut headers = Headers::new();

    if let Some(record_headers) = record.headers() {
        for header in record_headers.iter() {
            if let Some(value) = header.value {
                headers.insert(
                    header.key.to_string(),
                    String::from_utf8_lossy(value).into_owned(),
                );
            }
        }
    }

    headers.insert(
        KAFKA_PARTITION_HEADER.to_string(),
        record.partition().to_string(),
    );
    headers.insert(KAFKA_OFFSET_HEADER.to_string(), record.offset().to_string());

    if let Some(key) = record.key() {
        headers.insert(
            KAFKA_KEY_HEADER.to_string(),
            String::from_utf8_lossy(key).into_owned(),
        );
    }

    let position = RecordPosition {
        topic: record.topic().to_string(),
        partition: record.partition(),
        offset: record.offset(),
    };

    let timestamp = record
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    let payload = record
        .payload()
        .map_or_else(Bytes::new, Bytes::copy_from_slice);

    Message::new(
        format!("{}-{}-{}", position.topic, position.partition, position.offset),
        position.topic.clone(),
        payload,
    )
    .with_headers(headers)
    .with_timestamp(timestamp)
    .with_original(position)
}

/// Converts publish headers into record headers, adding the content type.
pub fn record_headers(options: &PublishOptions) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new_with_capacity(options.headers.len() + 1);

    for (name, value) in &options.headers {
        headers = headers.insert(Header {
            key: name,
            value: Some(value.as_str()),
        });
    }

    if let Some(content_type) = &options.content_type {
        if !options.headers.contains_key(CONTENT_TYPE_HEADER) {
            headers = headers.insert(Header {
                key: CONTENT_TYPE_HEADER,
                value: Some(content_type.as_str()),
            });
        }
    }

    headers
}

/// Produces a record and waits for its delivery report.
pub async fn produce(
    producer: &FutureProducer,
    topic: &str,
    payload: &[u8],
    options: &PublishOptions,
    queue_timeout: Duration,
) -> Result<()> {
    let hints = PartitionHints::from_headers(&options.headers);

    let mut record = FutureRecord::<str, [u8]>::to(topic)
        .payload(payload)
        .headers(record_headers(options));

    if let Some(key) = hints.key.as_deref() {
        record = record.key(key);
    }

    if let Some(partition) = hints.partition {
        record = record.partition(partition);
    }

    producer
        .send(record, Timeout::After(queue_timeout))
        .await
        .map(|_| ())
        .map_err(|(e, _)| Error::publish(topic, e))
}
