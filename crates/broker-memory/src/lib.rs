//! In-memory implementation of the message broker contract.
//!
//! Each topic is an unbounded queue owned by the broker instance. Messages
//! published before anyone subscribes wait in the queue. Subscription workers
//! read the queue directly, so anything not yet taken stays queued across
//! unsubscribe, and messages abandoned during shutdown are put back. Useful
//! for tests and local development.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use courier_broker::delivery::{
    DeliveryOutcome, RetryPolicy, Settle, WorkerContext, dead_letter_options, run_worker,
};
use courier_broker::subscription::{Subscription, SubscriptionRegistry};
use courier_broker::validation::validate_topic;
use courier_broker::{
    BrokerStats, Counters, Error, Message, MessageBroker, PublishOptions, Result, SharedHandler,
    SubscribeOptions, TopicOptions, TopicStats, generate_message_id,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BACKEND: &str = "memory";

#[derive(Debug)]
struct Queue {
    sender: flume::Sender<Message>,
    receiver: flume::Receiver<Message>,
    published: u64,
    consumed: u64,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = flume::unbounded();

        Self {
            sender,
            receiver,
            published: 0,
            consumed: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Topics {
    queues: Mutex<HashMap<String, Queue>>,
}

impl Topics {
    fn enqueue(&self, message: Message) -> Result<()> {
        let mut queues = self.queues.lock();
        let queue = queues
            .entry(message.topic.clone())
            .or_insert_with(Queue::new);

        let topic = message.topic.clone();
        queue
            .sender
            .send(message)
            .map_err(|e| Error::publish(topic, e.to_string()))?;
        queue.published += 1;

        Ok(())
    }

    fn requeue(&self, message: Message) {
        if let Some(queue) = self.queues.lock().get(&message.topic) {
            let _ = queue.sender.send(message);
        }
    }

    fn receiver(&self, topic: &str) -> flume::Receiver<Message> {
        self.queues
            .lock()
            .entry(topic.to_string())
            .or_insert_with(Queue::new)
            .receiver
            .clone()
    }

    fn record_consumed(&self, topic: &str) {
        if let Some(queue) = self.queues.lock().get_mut(topic) {
            queue.consumed += 1;
        }
    }
}

fn build_message(topic: &str, payload: Bytes, options: Option<&PublishOptions>) -> Message {
    let mut headers = options.map(|o| o.headers.clone()).unwrap_or_default();

    if let Some(content_type) = options.and_then(|o| o.content_type.as_ref()) {
        headers
            .entry(courier_broker::CONTENT_TYPE_HEADER.to_string())
            .or_insert_with(|| content_type.clone());
    }

    Message::new(generate_message_id(), topic, payload).with_headers(headers)
}

struct MemorySettle {
    topics: Arc<Topics>,
    dead_letter_topic: Option<String>,
}

#[async_trait]
impl Settle for MemorySettle {
    async fn settle(&self, message: Message, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Succeeded => self.topics.record_consumed(&message.topic),
            DeliveryOutcome::Exhausted(error) => {
                self.topics.record_consumed(&message.topic);

                if let Some(dead_letter_topic) = &self.dead_letter_topic {
                    let options = dead_letter_options(&message, &error);
                    let dead = build_message(dead_letter_topic, message.data.clone(), Some(&options));
                    if let Err(e) = self.topics.enqueue(dead) {
                        warn!(topic = %message.topic, error = %e, "failed to dead-letter message");
                    }
                }
            }
            DeliveryOutcome::Abandoned => self.topics.requeue(message),
        }
    }
}

/// Message broker living entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    root: Mutex<Option<CancellationToken>>,
    topics: Arc<Topics>,
    counters: Arc<Counters>,
    subscriptions: SubscriptionRegistry<()>,
}

impl MemoryBroker {
    /// Creates a disconnected broker with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn root_token(&self) -> Result<CancellationToken> {
        self.root.lock().clone().ok_or(Error::NotConnected)
    }

    async fn drain_subscriptions(&self) {
        let drained = self.subscriptions.lock().await.drain();

        for subscription in drained {
            subscription.shutdown().await;
        }
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn connect(&self) -> Result<()> {
        if self.root.lock().is_some() {
            self.disconnect().await?;
        }

        *self.root.lock() = Some(CancellationToken::new());
        info!("memory broker connected");

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(root) = self.root.lock().take() else {
            return Ok(());
        };

        root.cancel();
        self.drain_subscriptions().await;
        info!("memory broker disconnected");

        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        options: Option<&PublishOptions>,
    ) -> Result<()> {
        self.root_token()?;
        validate_topic(topic)?;

        self.topics.enqueue(build_message(topic, payload, options))?;
        self.counters.record_published();

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: SharedHandler,
        options: Option<SubscribeOptions>,
    ) -> Result<()> {
        let root = self.root_token()?;
        validate_topic(topic)?;

        let options = options.unwrap_or_default();
        let mut registry = self.subscriptions.lock().await;

        if let Some(previous) = registry.take(topic) {
            debug!(%topic, "replacing existing subscription");
            previous.shutdown().await;
        }

        let settle = Arc::new(MemorySettle {
            topics: self.topics.clone(),
            dead_letter_topic: options.dead_letter_topic.clone(),
        });
        let subscription = Subscription::new(topic, options, root.child_token(), ());

        let context = WorkerContext {
            handler,
            policy: RetryPolicy::from(subscription.options()),
            settle,
            counters: self.counters.clone(),
            cancel: subscription.cancel_token().clone(),
        };
        let receiver = self.topics.receiver(topic);
        for _ in 0..subscription.options().worker_count() {
            subscription.spawn(run_worker(receiver.clone(), context.clone()));
        }
        registry.insert(subscription);

        debug!(%topic, "subscribed");

        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let subscription = self.subscriptions.lock().await.remove(topic)?;
        subscription.shutdown().await;

        debug!(%topic, "unsubscribed");

        Ok(())
    }

    async fn create_topic(&self, topic: &str, _options: Option<&TopicOptions>) -> Result<()> {
        self.root_token()?;
        validate_topic(topic)?;

        self.topics
            .queues
            .lock()
            .entry(topic.to_string())
            .or_insert_with(Queue::new);

        Ok(())
    }

    async fn delete_topic(&self, topic: &str) -> Result<()> {
        self.root_token()?;

        self.topics.queues.lock().remove(topic);

        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        self.root_token()?;

        let mut topics: Vec<String> = self.topics.queues.lock().keys().cloned().collect();
        topics.sort();

        Ok(topics)
    }

    async fn ping(&self) -> Result<()> {
        self.root_token().map(|_| ())
    }

    async fn stats(&self) -> Result<BrokerStats> {
        let subscribed = self.subscriptions.topics().await;

        let mut stats = BrokerStats {
            connected_clients: u32::from(self.root.lock().is_some()),
            ..BrokerStats::default()
        };
        self.counters.fill(&mut stats);

        let queues = self.topics.queues.lock();
        let mut topics: Vec<TopicStats> = queues
            .iter()
            .map(|(name, queue)| TopicStats {
                name: name.clone(),
                messages_published: queue.published,
                messages_consumed: queue.consumed,
                subscribers: u32::from(subscribed.contains(name)),
                pending_messages: queue.receiver.len() as u64,
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        stats.topics = topics;

        Ok(stats)
    }
}
