//! Backend-agnostic option presets and handler decorators.
//!
//! Decorators wrap a [`SharedHandler`](crate::SharedHandler) and return a new
//! one, so they compose freely and are attached by the caller when
//! subscribing. None of them know which backend delivers the message.

mod batch;
mod circuit_breaker;
mod json;
mod logging;
mod presets;
mod retry;
mod router;
mod timeout;

pub use batch::BatchHandler;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use json::{JsonHandler, json_handler};
pub use logging::{LoggingHandler, with_logging};
pub use presets::{
    PARTITIONS_ARGUMENT, REPLICATION_FACTOR_ARGUMENT, default_publish_options,
    json_publish_options, kafka_publish_options, kafka_subscribe_options, kafka_topic_options,
    worker_subscribe_options,
};
pub use retry::{RetryHandler, with_retries};
pub use router::{MessageRouter, WILDCARD_ROUTE};
pub use timeout::{TimeoutHandler, with_timeout};
