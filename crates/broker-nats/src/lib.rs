//! NATS core implementation of the message broker contract.
//!
//! Topics map to subjects. Queue names map to queue groups. NATS core keeps
//! no state for subjects, so topic management is a no-op and a failed
//! delivery is simply dropped after its retries (or dead-lettered when
//! configured).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connect;

pub use connect::NatsBrokerConfig;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_nats::connection::State;
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use courier_broker::delivery::{DeliveryOutcome, Settle, dead_letter_options, spawn_delivery};
use courier_broker::subscription::{Subscription, SubscriptionRegistry};
use courier_broker::validation::validate_topic;
use courier_broker::{
    BrokerStats, CONTENT_TYPE_HEADER, Counters, Error, Headers, Message, MessageBroker,
    PublishOptions, Result, SharedHandler, SubscribeOptions, TopicOptions, generate_message_id,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const BACKEND: &str = "nats";

/// Header whose value is used as message id when present.
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

#[derive(Clone, Debug)]
struct Connection {
    client: Client,
    root: CancellationToken,
}

/// Message broker backed by NATS core pub/sub.
#[derive(Debug)]
pub struct NatsBroker {
    config: NatsBrokerConfig,
    connection: Mutex<Option<Connection>>,
    counters: Arc<Counters>,
    subscriptions: SubscriptionRegistry<()>,
}

impl NatsBroker {
    /// Creates a disconnected broker.
    #[must_use]
    pub fn new(config: NatsBrokerConfig) -> Self {
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

    async fn drain_subscriptions(&self) {
        let drained = self.subscriptions.lock().await.drain();

        for subscription in drained {
            subscription.shutdown().await;
        }
    }
}

/// Converts message headers, adding the content type when one is set.
fn header_map(options: &PublishOptions) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in &options.headers {
        headers.insert(name.as_str(), value.as_str());
    }

    if let Some(content_type) = &options.content_type {
        if !options.headers.contains_key(CONTENT_TYPE_HEADER) {
            headers.insert(CONTENT_TYPE_HEADER, content_type.as_str());
        }
    }

    headers
}

/// Builds the envelope for a delivered NATS message.
fn to_message(message: async_nats::Message) -> Message {
    let mut headers = Headers::new();

    if let Some(map) = &message.headers {
        for (name, values) in map.iter() {
            if let Some(value) = values.first() {
                headers.insert(name.to_string(), value.to_string());
            }
        }
    }

    let id = headers
        .get(MESSAGE_ID_HEADER)
        .cloned()
        .unwrap_or_else(generate_message_id);

    Message::new(id, message.subject.to_string(), message.payload.clone())
        .with_headers(headers)
        .with_original(message)
}

async fn publish_with(
    client: &Client,
    topic: &str,
    payload: Bytes,
    options: &PublishOptions,
) -> Result<()> {
    client
        .publish_with_headers(topic.to_string(), header_map(options), payload)
        .await
        .map_err(|e| Error::publish(topic, e))
}

struct NatsSettle {
    client: Client,
    dead_letter_topic: Option<String>,
}

#[async_trait]
impl Settle for NatsSettle {
    async fn settle(&self, message: Message, outcome: DeliveryOutcome) {
        let DeliveryOutcome::Exhausted(error) = outcome else {
            return;
        };

        if let Some(dead_letter_topic) = &self.dead_letter_topic {
            let options = dead_letter_options(&message, &error);
            if let Err(e) =
                publish_with(&self.client, dead_letter_topic, message.data.clone(), &options).await
            {
                warn!(topic = %message.topic, error = %e, "failed to dead-letter message");
            }
        }
    }
}

#[async_trait]
impl MessageBroker for NatsBroker {
    fn name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self))]
    async fn connect(&self) -> Result<()> {
        if self.connection.lock().is_some() {
            self.disconnect().await?;
        }

        let addrs = self.config.nats.server_addrs();
        let client = self
            .config
            .connect_options()?
            .connect(addrs.as_str())
            .await
            .map_err(|e| Error::connection(BACKEND, e))?;

        *self.connection.lock() = Some(Connection {
            client,
            root: CancellationToken::new(),
        });

        info!(servers = %addrs, "connected to NATS");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn disconnect(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().take() else {
            return Ok(());
        };

        connection.root.cancel();
        self.drain_subscriptions().await;

        if let Err(e) = connection.client.flush().await {
            warn!(error = %e, "failed to flush NATS client on disconnect");
        }

        info!("disconnected from NATS");

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
        publish_with(&connection.client, topic, payload, &options).await?;
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
            previous.shutdown().await;
        }

        let subscriber = match options.queue_name.as_deref().filter(|q| !q.is_empty()) {
            Some(queue) => connection
                .client
                .queue_subscribe(topic.to_string(), queue.to_string())
                .await,
            None => connection.client.subscribe(topic.to_string()).await,
        }
        .map_err(|e| Error::subscribe(topic, e))?;

        let settle = Arc::new(NatsSettle {
            client: connection.client.clone(),
            dead_letter_topic: options.dead_letter_topic.clone(),
        });
        let subscription = Subscription::new(topic, options, connection.root.child_token(), ());

        spawn_delivery(
            &subscription,
            Box::pin(subscriber.map(to_message)),
            handler,
            settle,
            self.counters.clone(),
        );
        registry.insert(subscription);

        info!("subscribed");

        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let subscription = self.subscriptions.lock().await.remove(topic)?;
        subscription.shutdown().await;

        debug!(%topic, "unsubscribed");

        Ok(())
    }

    async fn create_topic(&self, _topic: &str, _options: Option<&TopicOptions>) -> Result<()> {
        // Subjects exist implicitly.
        Ok(())
    }

    async fn delete_topic(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        Err(Error::unsupported(BACKEND, "list_topics"))
    }

    async fn ping(&self) -> Result<()> {
        let connection = self.connection()?;

        match connection.client.connection_state() {
            State::Connected => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    async fn stats(&self) -> Result<BrokerStats> {
        let mut stats = BrokerStats::default();
        self.counters.fill(&mut stats);

        let Ok(connection) = self.connection() else {
            return Ok(stats);
        };

        stats.connected_clients = 1;

        let statistics = connection.client.statistics();
        for (key, value) in [
            ("in_msgs", statistics.in_messages.load(Ordering::Relaxed)),
            ("out_msgs", statistics.out_messages.load(Ordering::Relaxed)),
            ("in_bytes", statistics.in_bytes.load(Ordering::Relaxed)),
            ("out_bytes", statistics.out_bytes.load(Ordering::Relaxed)),
            ("connects", statistics.connects.load(Ordering::Relaxed)),
        ] {
            stats.custom.insert(key.to_string(), serde_json::Value::from(value));
        }

        stats.custom.insert(
            "subscriptions".to_string(),
            serde_json::Value::from(self.subscriptions.len().await),
        );

        Ok(stats)
    }
}
