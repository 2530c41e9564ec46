//! Apache Kafka implementation of the message broker contract.
//!
//! Topics are Kafka topics. Every subscription runs its own group consumer
//! and delivers records of one partition in order, so the effective
//! concurrency of a subscription is the number of partitions assigned to it.
//! Offsets are stored once a record is settled and committed in the
//! background.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connect;
mod consumer;
mod record;

pub use connect::{DEFAULT_GROUP_PREFIX, KafkaBrokerConfig, sasl_mechanism};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_broker::delivery::{RetryPolicy, WorkerContext};
use courier_broker::helpers::{PARTITIONS_ARGUMENT, REPLICATION_FACTOR_ARGUMENT};
use courier_broker::subscription::{Subscription, SubscriptionRegistry};
use courier_broker::validation::validate_topic;
use courier_broker::{
    BrokerStats, Counters, Error, MessageBroker, PublishOptions, Result, SharedHandler,
    SubscribeOptions, TopicOptions, TopicStats,
};
use parking_lot::Mutex;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, Producer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use consumer::{KafkaSettle, poll};
use record::produce;

const BACKEND: &str = "kafka";
const INTERNAL_TOPIC_PREFIX: &str = "__";

#[derive(Clone)]
struct Connection {
    producer: FutureProducer,
    admin: Arc<AdminClient<DefaultClientContext>>,
    root: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

struct ClusterMetadata {
    brokers: usize,
    topics: Vec<String>,
}

async fn fetch_metadata(producer: &FutureProducer, timeout: Duration) -> Result<ClusterMetadata> {
    let producer = producer.clone();

    tokio::task::spawn_blocking(move || {
        producer
            .client()
            .fetch_metadata(None, timeout)
            .map(|metadata| ClusterMetadata {
                brokers: metadata.brokers().len(),
                topics: metadata
                    .topics()
                    .iter()
                    .map(|topic| topic.name().to_string())
                    .collect(),
            })
    })
    .await
    .map_err(|e| Error::backend("fetch_metadata", e))?
    .map_err(|e| Error::backend("fetch_metadata", e))
}

fn topic_argument(options: &TopicOptions, key: &str) -> Result<i32> {
    options.integer_argument(key).map_or(Ok(1), |value| {
        i32::try_from(value)
            .ok()
            .filter(|value| *value > 0)
            .ok_or_else(|| Error::InvalidConfiguration(format!("invalid {key}: {value}")))
    })
}

/// Message broker backed by an Apache Kafka cluster.
pub struct KafkaBroker {
    config: KafkaBrokerConfig,
    connection: Mutex<Option<Connection>>,
    counters: Arc<Counters>,
    subscriptions: SubscriptionRegistry<Arc<StreamConsumer>>,
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl KafkaBroker {
    /// Creates a disconnected broker.
    #[must_use]
    pub fn new(config: KafkaBrokerConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            counters: Arc::new(Counters::default()),
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    fn connection(&self) -> Result<Connection> {
        self.connection.lock().clone().ok_or(Error::NotConnected)
    }

    fn timeout(&self) -> Duration {
        self.config.connection.timeout
    }

    async fn drain_subscriptions(&self) {
        let drained = self.subscriptions.lock().await.drain();

        for subscription in drained {
            subscription.shutdown().await.unsubscribe();
        }
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    fn name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self))]
    async fn connect(&self) -> Result<()> {
        if self.connection.lock().is_some() {
            self.disconnect().await?;
        }

        let producer: FutureProducer = self
            .config
            .producer_config()?
            .create()
            .map_err(|e| Error::connection(BACKEND, e))?;
        let admin: AdminClient<DefaultClientContext> = self
            .config
            .client_config()?
            .create()
            .map_err(|e| Error::connection(BACKEND, e))?;

        let metadata = fetch_metadata(&producer, self.timeout())
            .await
            .map_err(|e| Error::connection(BACKEND, e))?;

        *self.connection.lock() = Some(Connection {
            producer,
            admin: Arc::new(admin),
            root: CancellationToken::new(),
        });

        info!(brokers = metadata.brokers, "connected to Kafka");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn disconnect(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().take() else {
            return Ok(());
        };

        connection.root.cancel();
        self.drain_subscriptions().await;

        let timeout = self.timeout();
        let producer = connection.producer;
        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::backend("flush", e))?;

        if let Err(e) = flushed {
            warn!(error = %e, "failed to flush Kafka producer on disconnect");
        }

        info!("disconnected from Kafka");

        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        options: Option<&PublishOptions>,
    ) -> Result<()> {
        let connection = self.connection()?;
        validate_topic(topic)?;

        let options = options.cloned().unwrap_or_default();
        produce(
            &connection.producer,
            topic,
            &payload,
            &options,
            self.timeout(),
        )
        .await?;
        self.counters.record_published();

        Ok(())
    }

    #[instrument(skip(self, handler, options))]
    async fn subscribe(
        &self,
        topic: &str,
        handler: SharedHandler,
        options: Option<SubscribeOptions>,
    ) -> Result<()> {
        let connection = self.connection()?;
        validate_topic(topic)?;

        let options = options.unwrap_or_default();
        let mut registry = self.subscriptions.lock().await;

        if let Some(previous) = registry.take(topic) {
            debug!("replacing existing subscription");
            previous.shutdown().await.unsubscribe();
        }

        let group_id = self.config.group_id(topic, options.queue_name.as_deref());
        let consumer: StreamConsumer = self
            .config
            .consumer_config(&group_id)?
            .create()
            .map_err(|e| Error::subscribe(topic, e))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| Error::subscribe(topic, e))?;
        let consumer = Arc::new(consumer);

        let capacity = usize::from(options.prefetch_count).max(1);
        let settle = Arc::new(KafkaSettle {
            consumer: consumer.clone(),
            producer: connection.producer.clone(),
            dead_letter_topic: options.dead_letter_topic.clone(),
            timeout: self.timeout(),
        });
        let policy = RetryPolicy::from(&options);
        let subscription = Subscription::new(
            topic,
            options,
            connection.root.child_token(),
            consumer.clone(),
        );

        let context = WorkerContext {
            handler,
            policy,
            settle,
            counters: self.counters.clone(),
            cancel: subscription.cancel_token().clone(),
        };
        subscription.spawn(poll(consumer, context, capacity));
        registry.insert(subscription);

        info!(group = %group_id, "subscribed");

        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let subscription = self.subscriptions.lock().await.remove(topic)?;
        subscription.shutdown().await.unsubscribe();

        debug!(%topic, "unsubscribed");

        Ok(())
    }

    async fn create_topic(&self, topic: &str, options: Option<&TopicOptions>) -> Result<()> {
        let connection = self.connection()?;
        validate_topic(topic)?;

        let options = options.cloned().unwrap_or_default();
        let partitions = topic_argument(&options, PARTITIONS_ARGUMENT)?;
        let replication = topic_argument(&options, REPLICATION_FACTOR_ARGUMENT)?;

        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(replication));
        let admin_options = AdminOptions::new().operation_timeout(Some(self.timeout()));

        let results = connection
            .admin
            .create_topics(&[new_topic], &admin_options)
            .await
            .map_err(|e| Error::backend("create_topic", e))?;

        for result in results {
            if let Err((name, code)) = result {
                return Err(Error::backend(
                    "create_topic",
                    format!("failed to create topic {name}: {code}"),
                ));
            }
        }

        info!(%topic, partitions, replication, "created topic");

        Ok(())
    }

    async fn delete_topic(&self, topic: &str) -> Result<()> {
        let connection = self.connection()?;
        validate_topic(topic)?;

        let admin_options = AdminOptions::new().operation_timeout(Some(self.timeout()));
        let results = connection
            .admin
            .delete_topics(&[topic], &admin_options)
            .await
            .map_err(|e| Error::backend("delete_topic", e))?;

        for result in results {
            if let Err((name, code)) = result {
                return Err(Error::backend(
                    "delete_topic",
                    format!("failed to delete topic {name}: {code}"),
                ));
            }
        }

        info!(%topic, "deleted topic");

        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let connection = self.connection()?;

        let mut topics: Vec<String> = fetch_metadata(&connection.producer, self.timeout())
            .await?
            .topics
            .into_iter()
            .filter(|topic| !topic.starts_with(INTERNAL_TOPIC_PREFIX))
            .collect();
        topics.sort();

        Ok(topics)
    }

    async fn ping(&self) -> Result<()> {
        let connection = self.connection()?;

        let metadata = fetch_metadata(&connection.producer, self.timeout()).await?;
        if metadata.brokers == 0 {
            return Err(Error::NotConnected);
        }

        Ok(())
    }

    async fn stats(&self) -> Result<BrokerStats> {
        let mut stats = BrokerStats::default();
        self.counters.fill(&mut stats);

        if self.connection.lock().is_some() {
            stats.connected_clients = 1;
        }

        stats.topics = self
            .subscriptions
            .topics()
            .await
            .into_iter()
            .map(|name| TopicStats {
                name,
                subscribers: 1,
                ..TopicStats::default()
            })
            .collect();

        stats.custom.insert(
            "brokers".to_string(),
            serde_json::Value::from(self.config.kafka.bootstrap_servers().unwrap_or_default()),
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_broker::helpers::kafka_topic_options;

    use assert_matches::assert_matches;

    fn broker() -> KafkaBroker {
        let mut config = KafkaBrokerConfig::default();
        config.kafka.brokers = vec!["localhost:9092".to_string()];
        KafkaBroker::new(config)
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let broker = broker();

        assert_matches!(
            broker.publish("orders", Bytes::new(), None).await,
            Err(Error::NotConnected)
        );
        assert_matches!(broker.list_topics().await, Err(Error::NotConnected));
        assert_matches!(broker.ping().await, Err(Error::NotConnected));
        assert!(broker.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_stats_while_disconnected() {
        let broker = broker();

        let stats = broker.stats().await.unwrap();

        assert_eq!(stats.connected_clients, 0);
        assert!(stats.topics.is_empty());
        assert_eq!(stats.custom["brokers"], "localhost:9092");
    }

    #[test]
    fn test_topic_arguments_default_to_one() {
        let options = TopicOptions::default();

        assert_eq!(topic_argument(&options, PARTITIONS_ARGUMENT).unwrap(), 1);
        assert_eq!(
            topic_argument(&options, REPLICATION_FACTOR_ARGUMENT).unwrap(),
            1
        );
    }

    #[test]
    fn test_topic_arguments_from_preset() {
        let options = kafka_topic_options(6, 3);

        assert_eq!(topic_argument(&options, PARTITIONS_ARGUMENT).unwrap(), 6);
        assert_eq!(
            topic_argument(&options, REPLICATION_FACTOR_ARGUMENT).unwrap(),
            3
        );
    }

    #[test]
    fn test_non_positive_partitions_are_rejected() {
        let options = kafka_topic_options(0, 1);

        assert_matches!(
            topic_argument(&options, PARTITIONS_ARGUMENT),
            Err(Error::InvalidConfiguration(_))
        );
    }
}
