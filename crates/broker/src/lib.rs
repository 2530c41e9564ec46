//! Backend-agnostic message broker contract.
//!
//! Defines the [`MessageBroker`] trait implemented by the queue, pub/sub and
//! log adapters, the message and option types they share, the retry loop
//! every adapter runs deliveries through, configuration types, and a set of
//! handler decorators.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod broker;
mod error;
mod handler;
mod message;
mod options;
mod stats;

/// Broker configuration and profiles.
pub mod config;

/// Shared delivery and retry loop.
pub mod delivery;

/// Option presets and handler decorators.
pub mod helpers;

/// Active subscription bookkeeping for adapters.
pub mod subscription;

/// Message validation.
pub mod validation;

pub use broker::{MessageBroker, MessageBrokerExt};
pub use config::{BrokerConfig, BrokerSettings, BrokerType};
pub use error::{BoxError, Error, Result};
pub use handler::{HandlerError, HandlerFn, HandlerResult, MessageHandler, SharedHandler, handler_fn};
pub use message::{BatchMessage, BatchPayload, Headers, Message, generate_message_id};
pub use options::{
    CONTENT_TYPE_HEADER, JSON_CONTENT_TYPE, KAFKA_KEY_HEADER, KAFKA_OFFSET_HEADER,
    KAFKA_PARTITION_HEADER, MAX_PRIORITY, OCTET_STREAM_CONTENT_TYPE, PartitionHints,
    PublishOptions, SubscribeOptions, TopicOptions,
};
pub use stats::{BrokerStats, Counters, TopicStats};
