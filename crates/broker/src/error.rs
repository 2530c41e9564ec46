use std::time::Duration;

use thiserror::Error;

/// Boxed error type used to carry backend and handler failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur when using a message broker.
#[derive(Debug, Error)]
pub enum Error {
    /// A handler wrapped by a circuit breaker was not invoked because the breaker is open.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Establishing the backend connection failed.
    #[error("failed to connect to {backend}: {source}")]
    Connection {
        /// Backend name.
        backend: &'static str,
        /// Underlying client error.
        #[source]
        source: BoxError,
    },

    /// An administrative or control operation failed on the backend.
    #[error("{operation} failed: {source}")]
    Backend {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying client error.
        #[source]
        source: BoxError,
    },

    /// A message handler returned an error.
    #[error("message handler failed: {0}")]
    HandlerFailed(#[source] BoxError),

    /// The configuration is missing a required field or is otherwise unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A message failed validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// No route matched the topic of a message.
    #[error("no route found for topic: {0}")]
    NoRoute(String),

    /// The broker is not connected.
    #[error("message broker not connected")]
    NotConnected,

    /// Publishing to a topic failed.
    #[error("failed to publish message to topic {topic}: {source}")]
    PublishFailed {
        /// Topic the message was published to.
        topic: String,
        /// Underlying error.
        #[source]
        source: BoxError,
    },

    /// A handler still failed after the configured number of retries.
    #[error("failed after {retries} retries: {source}")]
    RetriesExhausted {
        /// Number of retries performed.
        retries: u32,
        /// The last error returned by the handler.
        #[source]
        source: BoxError,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Subscribing to a topic failed.
    #[error("failed to subscribe to topic {topic}: {source}")]
    SubscribeFailed {
        /// Topic of the subscription.
        topic: String,
        /// Underlying client error.
        #[source]
        source: BoxError,
    },

    /// No subscription is registered for the topic.
    #[error("subscription not found for topic: {0}")]
    SubscriptionNotFound(String),

    /// A handler did not complete before its deadline.
    #[error("message handler timeout after {0:?}")]
    Timeout(Duration),

    /// The operation is not expressible in the selected backend's protocol.
    #[error("operation not supported by {backend}: {operation}")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// Operation that was requested.
        operation: &'static str,
    },
}

impl Error {
    /// Wraps a backend connection error.
    pub fn connection(backend: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Connection {
            backend,
            source: source.into(),
        }
    }

    /// Wraps a backend error raised by an administrative operation.
    pub fn backend(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }

    /// Wraps a publish error for the given topic.
    pub fn publish(topic: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            source: source.into(),
        }
    }

    /// Wraps a subscribe error for the given topic.
    pub fn subscribe(topic: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::SubscribeFailed {
            topic: topic.into(),
            source: source.into(),
        }
    }

    /// Builds an unsupported-operation error.
    #[must_use]
    pub const fn unsupported(backend: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { backend, operation }
    }

    /// Whether the error reports an operation the backend cannot perform.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Result alias for broker operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
