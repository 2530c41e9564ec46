use courier_broker::{Headers, PublishOptions};

use chrono::{DateTime, Utc};
use lapin::BasicProperties;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use uuid::Uuid;

/// Header read by the delayed-message exchange plugin.
pub const DELAY_HEADER: &str = "x-delay";

const TRANSIENT: u8 = 1;
const PERSISTENT: u8 = 2;

/// Maps publish options onto AMQP message properties.
///
/// Out-of-range priorities are dropped rather than clamped.
pub fn publish_properties(options: &PublishOptions) -> BasicProperties {
    let mut properties = BasicProperties::default()
        .with_delivery_mode(if options.persistent {
            PERSISTENT
        } else {
            TRANSIENT
        })
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_timestamp(u64::try_from(Utc::now().timestamp()).unwrap_or_default());

    if let Some(content_type) = &options.content_type {
        properties = properties.with_content_type(ShortString::from(content_type.as_str()));
    }

    if let Some(priority) = options.effective_priority() {
        properties = properties.with_priority(priority);
    }

    if let Some(ttl) = options.ttl.filter(|ttl| !ttl.is_zero()) {
        properties = properties.with_expiration(ShortString::from(ttl.as_millis().to_string()));
    }

    let mut table = FieldTable::default();
    for (name, value) in &options.headers {
        table.insert(
            ShortString::from(name.as_str()),
            AMQPValue::LongString(LongString::from(value.as_str())),
        );
    }

    if let Some(delay) = options.delay.filter(|delay| !delay.is_zero()) {
        table.insert(
            ShortString::from(DELAY_HEADER),
            AMQPValue::LongLongInt(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)),
        );
    }

    if !table.inner().is_empty() {
        properties = properties.with_headers(table);
    }

    properties
}

fn value_to_string(value: &AMQPValue) -> String {
    match value {
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        AMQPValue::ShortString(s) => s.as_str().to_string(),
        AMQPValue::Boolean(b) => b.to_string(),
        AMQPValue::ShortShortInt(n) => n.to_string(),
        AMQPValue::ShortShortUInt(n) => n.to_string(),
        AMQPValue::ShortInt(n) => n.to_string(),
        AMQPValue::ShortUInt(n) => n.to_string(),
        AMQPValue::LongInt(n) => n.to_string(),
        AMQPValue::LongUInt(n) => n.to_string(),
        AMQPValue::LongLongInt(n) => n.to_string(),
        AMQPValue::Timestamp(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}

/// Flattens an AMQP header table into string headers.
pub fn headers_from_table(table: Option<&FieldTable>) -> Headers {
    table
        .map(|table| {
            table
                .inner()
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value_to_string(value)))
                .collect()
        })
        .unwrap_or_default()
}

/// Converts an AMQP timestamp (seconds) into a UTC time, falling back to now.
pub fn delivery_timestamp(timestamp: Option<u64>) -> DateTime<Utc> {
    timestamp
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

/// Converts topic arguments into an AMQP argument table.
pub fn arguments_table(arguments: &std::collections::HashMap<String, serde_json::Value>) -> FieldTable {
    let mut table = FieldTable::default();

    for (name, value) in arguments {
        let value = match value {
            serde_json::Value::Bool(b) => AMQPValue::Boolean(*b),
            serde_json::Value::Number(n) if n.is_i64() => {
                AMQPValue::LongLongInt(n.as_i64().unwrap_or_default())
            }
            serde_json::Value::Number(n) => AMQPValue::Double(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => AMQPValue::LongString(LongString::from(s.as_str())),
            other => AMQPValue::LongString(LongString::from(other.to_string())),
        };
        table.insert(ShortString::from(name.as_str()), value);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn test_out_of_range_priority_sets_no_priority() {
        let options = PublishOptions {
            priority: Some(15),
            ..PublishOptions::default()
        };

        let properties = publish_properties(&options);

        assert_eq!(*properties.priority(), None);
        assert_eq!(*properties.delivery_mode(), Some(TRANSIENT));
        assert!(properties.message_id().is_some());
    }

    #[test]
    fn test_full_option_mapping() {
        let options = PublishOptions {
            persistent: true,
            priority: Some(5),
            ttl: Some(Duration::from_secs(30)),
            delay: Some(Duration::from_millis(1500)),
            content_type: Some("application/json".to_string()),
            ..PublishOptions::default()
        }
        .with_header("tenant", "acme");

        let properties = publish_properties(&options);

        assert_eq!(*properties.delivery_mode(), Some(PERSISTENT));
        assert_eq!(*properties.priority(), Some(5));
        assert_eq!(
            properties.expiration().as_ref().map(ShortString::as_str),
            Some("30000")
        );
        assert_eq!(
            properties.content_type().as_ref().map(ShortString::as_str),
            Some("application/json")
        );

        let headers = headers_from_table(properties.headers().as_ref());
        assert_eq!(headers["tenant"], "acme");
        assert_eq!(headers[DELAY_HEADER], "1500");
    }

    #[test]
    fn test_missing_timestamp_falls_back_to_now() {
        let before = Utc::now();

        assert!(delivery_timestamp(None) >= before);
        assert_eq!(delivery_timestamp(Some(0)).timestamp(), 0);
    }
}
