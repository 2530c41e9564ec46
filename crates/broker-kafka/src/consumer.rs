use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_broker::Message;
use courier_broker::delivery::{
    DeliveryOutcome, Settle, WorkerContext, dead_letter_options, run_worker,
};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::FutureProducer;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::record::{RecordPosition, produce, to_message};

/// Stores offsets once a record is settled and dead-letters exhausted ones.
///
/// Exhausted records still advance the offset so a poison record cannot
/// stall its partition.
pub struct KafkaSettle {
    pub consumer: Arc<StreamConsumer>,
    pub producer: FutureProducer,
    pub dead_letter_topic: Option<String>,
    pub timeout: Duration,
}

#[async_trait]
impl Settle for KafkaSettle {
    async fn settle(&self, message: Message, outcome: DeliveryOutcome) {
        match &outcome {
            DeliveryOutcome::Abandoned => return,
            DeliveryOutcome::Succeeded => {}
            DeliveryOutcome::Exhausted(err) => {
                if let Some(dead_letter_topic) = &self.dead_letter_topic {
                    let options = dead_letter_options(&message, err);
                    if let Err(e) = produce(
                        &self.producer,
                        dead_letter_topic,
                        &message.data,
                        &options,
                        self.timeout,
                    )
                    .await
                    {
                        error!(topic = %message.topic, error = %e, "failed to dead-letter record");
                    }
                }
            }
        }

        let Some(position) = message.original::<RecordPosition>() else {
            warn!(id = %message.id, "record has no position");
            return;
        };

        if let Err(e) =
            self.consumer
                .store_offset(&position.topic, position.partition, position.offset + 1)
        {
            warn!(id = %message.id, error = %e, "failed to store offset");
        }
    }
}

/// Polls the group consumer and fans records out to one ordered worker per
/// partition. Workers are started on first sight of their partition.
pub async fn poll(consumer: Arc<StreamConsumer>, context: WorkerContext, capacity: usize) {
    let workers = TaskTracker::new();
    let mut partitions: HashMap<i32, flume::Sender<Message>> = HashMap::new();

    loop {
        let message = tokio::select! {
            biased;
            () = context.cancel.cancelled() => break,
            received = consumer.recv() => match received {
                Ok(record) => to_message(&record),
                Err(e) => {
                    warn!(error = %e, "consumer error");
                    continue;
                }
            },
        };

        let partition = message
            .original::<RecordPosition>()
            .map_or(0, |position| position.partition);

        let sender = partitions.entry(partition).or_insert_with(|| {
            let (sender, receiver) = flume::bounded(capacity);
            workers.spawn(run_worker(receiver, context.clone()));
            debug!(partition, "started partition worker");
            sender
        });

        tokio::select! {
            biased;
            () = context.cancel.cancelled() => break,
            sent = sender.send_async(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    drop(partitions);
    workers.close();
    workers.wait().await;

    debug!("consumer poll loop stopped");
}
