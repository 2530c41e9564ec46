use crate::error::{Error, Result};
use crate::handler::SharedHandler;
use crate::message::BatchMessage;
use crate::options::{
    CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE, PublishOptions, SubscribeOptions, TopicOptions,
};
use crate::stats::BrokerStats;
use crate::validation::validate_batch;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

/// A connection to a message broker.
///
/// Every backend implements the same contract so callers can switch between
/// them by configuration alone.
#[async_trait]
pub trait MessageBroker
where
    Self: Debug + Send + Sync + 'static,
{
    /// Backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Establishes the backend connection.
    ///
    /// Calling this on a connected broker cancels every subscription and
    /// rebuilds the connection from scratch.
    async fn connect(&self) -> Result<()>;

    /// Stops every subscription, waits for in-flight handlers and releases the connection.
    ///
    /// Does nothing when the broker was never connected.
    async fn disconnect(&self) -> Result<()>;

    /// Alias of [`MessageBroker::disconnect`].
    async fn close(&self) -> Result<()> {
        self.disconnect().await
    }

    /// Publishes a payload and waits for the backend to accept it.
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        options: Option<&PublishOptions>,
    ) -> Result<()>;

    /// Publishes messages in order, stopping at the first failure.
    ///
    /// `options` act as defaults for every message; message headers override
    /// option headers with the same key. Messages published before a failure
    /// stay published.
    async fn publish_batch(
        &self,
        messages: Vec<BatchMessage>,
        options: Option<&PublishOptions>,
    ) -> Result<()> {
        validate_batch(&messages)?;

        let defaults = options.cloned().unwrap_or_default();

        for message in messages {
            let options = defaults.merged_with(&message.headers);

            self.publish(&message.topic, message.data, Some(&options))
                .await
                .map_err(|e| match e {
                    e @ Error::PublishFailed { .. } => e,
                    e => Error::publish(message.topic.clone(), e),
                })?;
        }

        debug!(broker = self.name(), "batch published");

        Ok(())
    }

    /// Registers `handler` for `topic` and starts delivering to it.
    ///
    /// Returns once the subscription is registered. An existing subscription
    /// on the same topic is drained and replaced.
    async fn subscribe(
        &self,
        topic: &str,
        handler: SharedHandler,
        options: Option<SubscribeOptions>,
    ) -> Result<()>;

    /// Stops the subscription for `topic` and waits for its workers.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Creates a topic (queue, subject or log topic).
    async fn create_topic(&self, topic: &str, options: Option<&TopicOptions>) -> Result<()>;

    /// Deletes a topic.
    async fn delete_topic(&self, topic: &str) -> Result<()>;

    /// Lists known topics.
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Checks that the connection is alive.
    async fn ping(&self) -> Result<()>;

    /// Best-effort statistics.
    async fn stats(&self) -> Result<BrokerStats>;
}

/// Convenience methods available on every [`MessageBroker`].
#[async_trait]
pub trait MessageBrokerExt: MessageBroker {
    /// Serializes `value` as JSON and publishes it with a JSON content type.
    async fn publish_json<V>(
        &self,
        topic: &str,
        value: &V,
        options: Option<&PublishOptions>,
    ) -> Result<()>
    where
        V: Serialize + Sync + ?Sized,
    {
        let payload = Bytes::from(serde_json::to_vec(value)?);

        let mut options = options.cloned().unwrap_or_default();
        options
            .headers
            .insert(CONTENT_TYPE_HEADER.to_string(), JSON_CONTENT_TYPE.to_string());
        if options.content_type.is_none() {
            options.content_type = Some(JSON_CONTENT_TYPE.to_string());
        }

        self.publish(topic, payload, Some(&options)).await
    }
}

impl<B> MessageBrokerExt for B where B: MessageBroker + ?Sized {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Headers;

    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    /// Records publishes and fails on one topic.
    #[derive(Debug, Default)]
    struct RecordingBroker {
        fail_on: Option<String>,
        published: Mutex<Vec<(String, Bytes, PublishOptions)>>,
    }

    #[async_trait]
    impl MessageBroker for RecordingBroker {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn publish(
            &self,
            topic: &str,
            payload: Bytes,
            options: Option<&PublishOptions>,
        ) -> Result<()> {
            if self.fail_on.as_deref() == Some(topic) {
                return Err(Error::NotConnected);
            }

            self.published.lock().push((
                topic.to_string(),
                payload,
                options.cloned().unwrap_or_default(),
            ));

            Ok(())
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _handler: SharedHandler,
            _options: Option<SubscribeOptions>,
        ) -> Result<()> {
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> Result<()> {
            Err(Error::SubscriptionNotFound(topic.to_string()))
        }

        async fn create_topic(&self, _topic: &str, _options: Option<&TopicOptions>) -> Result<()> {
            Ok(())
        }

        async fn delete_topic(&self, _topic: &str) -> Result<()> {
            Ok(())
        }

        async fn list_topics(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn stats(&self) -> Result<BrokerStats> {
            Ok(BrokerStats::default())
        }
    }

    #[tokio::test]
    async fn test_publish_batch_stops_at_first_failure() {
        let broker = RecordingBroker {
            fail_on: Some("t2".to_string()),
            ..RecordingBroker::default()
        };

        let messages = vec![
            BatchMessage::new("t1", "one"),
            BatchMessage::new("t2", "two"),
            BatchMessage::new("t3", "three"),
        ];

        let result = broker.publish_batch(messages, None).await;

        assert_matches!(result, Err(Error::PublishFailed { topic, .. }) if topic == "t2");

        let published = broker.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "t1");
    }

    #[tokio::test]
    async fn test_publish_batch_merges_headers_with_message_precedence() {
        let broker = RecordingBroker::default();
        let defaults = PublishOptions {
            persistent: true,
            ..PublishOptions::default()
        }
        .with_header("source", "batch")
        .with_header("tenant", "acme");

        let messages = vec![BatchMessage::new("t1", "one").with_header("source", "message")];

        broker.publish_batch(messages, Some(&defaults)).await.unwrap();

        let published = broker.published.lock();
        let options = &published[0].2;
        assert!(options.persistent);
        assert_eq!(options.headers["source"], "message");
        assert_eq!(options.headers["tenant"], "acme");
    }

    #[tokio::test]
    async fn test_publish_batch_rejects_empty_topic_before_sending() {
        let broker = RecordingBroker::default();

        let messages = vec![BatchMessage::new("t1", "one"), BatchMessage::new("", "two")];

        let result = broker.publish_batch(messages, None).await;

        assert_matches!(result, Err(Error::InvalidMessage(_)));
        assert!(broker.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_publish_json_sets_content_type() {
        let broker = RecordingBroker::default();
        let value: HashMap<&str, u32> = HashMap::from([("id", 7)]);

        broker.publish_json("orders", &value, None).await.unwrap();

        let published = broker.published.lock();
        let (topic, payload, options) = &published[0];
        assert_eq!(topic, "orders");
        assert_eq!(payload, &Bytes::from_static(b"{\"id\":7}"));
        assert_eq!(options.headers[CONTENT_TYPE_HEADER], JSON_CONTENT_TYPE);
        assert_eq!(options.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_publish_json_keeps_explicit_content_type() {
        let broker = RecordingBroker::default();
        let options = PublishOptions {
            content_type: Some("application/vnd.orders+json".to_string()),
            headers: Headers::new(),
            ..PublishOptions::default()
        };

        broker
            .publish_json("orders", &[1, 2, 3], Some(&options))
            .await
            .unwrap();

        let published = broker.published.lock();
        assert_eq!(
            published[0].2.content_type.as_deref(),
            Some("application/vnd.orders+json")
        );
    }

    #[tokio::test]
    async fn test_close_delegates_to_disconnect() {
        let broker: Box<dyn MessageBroker> = Box::new(RecordingBroker::default());

        assert!(broker.close().await.is_ok());
        assert_eq!(broker.name(), "recording");
    }
}
