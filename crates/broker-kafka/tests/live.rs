//! Tests against a running Kafka cluster. Run with `KAFKA_BROKERS` set and `--ignored`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_broker::helpers::{kafka_publish_options, kafka_subscribe_options, kafka_topic_options};
use courier_broker::{KAFKA_KEY_HEADER, Message, MessageBroker, handler_fn};
use courier_broker_kafka::{KafkaBroker, KafkaBrokerConfig};
use parking_lot::Mutex;
use serial_test::serial;

fn broker() -> KafkaBroker {
    let brokers = std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());

    let mut config = KafkaBrokerConfig::default();
    config.kafka.brokers = brokers.split(',').map(ToString::to_string).collect();
    KafkaBroker::new(config)
}

#[tokio::test]
#[serial]
#[ignore = "requires a Kafka cluster"]
async fn test_keyed_records_round_trip() {
    let broker = broker();
    broker.connect().await.unwrap();
    broker.ping().await.unwrap();

    let topic = format!("courier-live-{}", std::process::id());
    broker
        .create_topic(&topic, Some(&kafka_topic_options(3, 1)))
        .await
        .unwrap();
    assert!(broker.list_topics().await.unwrap().contains(&topic));

    let received = Arc::new(Mutex::new(Vec::new()));
    let handler = handler_fn({
        let received = received.clone();
        move |message: Message| {
            let received = received.clone();
            async move {
                received.lock().push(message);
                Ok(())
            }
        }
    });
    broker
        .subscribe(&topic, handler, Some(kafka_subscribe_options("courier-live", 3)))
        .await
        .unwrap();

    let options = kafka_publish_options(Some("customer-7"), None);
    for i in 0..3 {
        broker
            .publish(&topic, Bytes::from(format!("event-{i}")), Some(&options))
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(30), async {
        while received.lock().len() < 3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();

    {
        let received = received.lock();
        let payloads: Vec<_> = received.iter().map(|m| m.data.clone()).collect();
        assert_eq!(
            payloads,
            vec![
                Bytes::from_static(b"event-0"),
                Bytes::from_static(b"event-1"),
                Bytes::from_static(b"event-2"),
            ]
        );
        assert!(
            received
                .iter()
                .all(|m| m.header(KAFKA_KEY_HEADER) == Some("customer-7"))
        );
    }

    broker.unsubscribe(&topic).await.unwrap();
    broker.delete_topic(&topic).await.unwrap();
    broker.close().await.unwrap();
}
