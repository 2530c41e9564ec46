//! Builds a message broker for a backend chosen at runtime.
//!
//! Callers hold the result as `Arc<dyn MessageBroker>` and never name the
//! concrete adapter.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub use courier_broker::{BrokerConfig, BrokerSettings, BrokerType};

use std::sync::Arc;

use courier_broker::config::BackendConfig;
use courier_broker::{MessageBroker, Result};
use courier_broker_amqp::{AmqpBroker, AmqpBrokerConfig};
use courier_broker_kafka::{KafkaBroker, KafkaBrokerConfig};
use courier_broker_memory::MemoryBroker;
use courier_broker_nats::{NatsBroker, NatsBrokerConfig};
use tracing::debug;

/// Creates a disconnected broker of `kind` from flat settings.
///
/// # Errors
///
/// Returns `Error::InvalidConfiguration` when the settings lack what `kind`
/// needs, such as an AMQP URL.
pub fn create_broker(kind: BrokerType, settings: &BrokerSettings) -> Result<Arc<dyn MessageBroker>> {
    from_config(settings.clone().into_config(kind)?)
}

/// Creates a broker for the first backend the settings configure, checking
/// AMQP, then NATS, then Kafka.
///
/// # Errors
///
/// Returns `Error::Unsupported` when no backend can be detected.
pub fn create_broker_auto(settings: &BrokerSettings) -> Result<Arc<dyn MessageBroker>> {
    let kind = settings.detect_broker_type()?;
    debug!(%kind, "detected broker type");

    create_broker(kind, settings)
}

/// Creates a disconnected broker from a typed configuration.
///
/// # Errors
///
/// Returns `Error::InvalidConfiguration` when the backend section is incomplete.
pub fn from_config(config: BrokerConfig) -> Result<Arc<dyn MessageBroker>> {
    config.validate()?;

    let broker: Arc<dyn MessageBroker> = match &config.backend {
        BackendConfig::Amqp(_) => Arc::new(AmqpBroker::new(AmqpBrokerConfig::try_from(config)?)),
        BackendConfig::Nats(_) => Arc::new(NatsBroker::new(NatsBrokerConfig::try_from(config)?)),
        BackendConfig::Kafka(_) => {
            Arc::new(KafkaBroker::new(KafkaBrokerConfig::try_from(config)?))
        }
        BackendConfig::Memory => Arc::new(MemoryBroker::new()),
    };

    debug!(backend = broker.name(), "created broker");

    Ok(broker)
}
