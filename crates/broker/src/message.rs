use crate::error::{Error, Result};

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Headers attached to messages.
pub type Headers = HashMap<String, String>;

/// Generates an identifier for backends that do not assign one.
#[must_use]
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// A message delivered to a subscription handler.
#[derive(Clone)]
pub struct Message {
    /// Backend-assigned or synthesized identifier.
    pub id: String,

    /// Topic (routing key, subject or log topic) the message arrived on.
    pub topic: String,

    /// Raw payload.
    pub data: Bytes,

    /// Message headers.
    pub headers: Headers,

    /// Time the message was produced, or received when the backend has no timestamp.
    pub timestamp: DateTime<Utc>,

    /// Current retry attempt, starting at zero.
    pub retry: u32,

    /// Maximum retries configured for the subscription.
    pub max_retries: u32,

    original: Option<Arc<dyn Any + Send + Sync>>,
}

impl Message {
    /// Creates a message with a fresh timestamp and no retries.
    pub fn new(id: impl Into<String>, topic: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            data: data.into(),
            headers: Headers::new(),
            timestamp: Utc::now(),
            retry: 0,
            max_retries: 0,
            original: None,
        }
    }

    /// Replaces the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attaches the backend-native message. Only adapters should call this.
    #[must_use]
    pub fn with_original<T>(mut self, original: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.original = Some(Arc::new(original));
        self
    }

    /// Returns the backend-native message if it has the requested type.
    ///
    /// Handlers must not rely on this; it exists so adapters can act on the
    /// delivery they produced.
    #[must_use]
    pub fn original<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.original.as_deref().and_then(|o| o.downcast_ref::<T>())
    }

    /// Looks up a header.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("data_len", &self.data.len())
            .field("headers", &self.headers)
            .field("timestamp", &self.timestamp)
            .field("retry", &self.retry)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// A message handed to `publish_batch`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchMessage {
    /// Destination topic.
    pub topic: String,

    /// Raw payload.
    pub data: Bytes,

    /// Per-message headers, merged over the batch-wide publish options.
    pub headers: Headers,
}

/// Payload accepted by [`BatchMessage::from_value`].
#[derive(Debug)]
pub enum BatchPayload<'a, T: ?Sized> {
    /// Raw bytes, sent as-is.
    Bytes(Bytes),
    /// Text, sent as UTF-8.
    Text(&'a str),
    /// Any serializable value, sent as JSON.
    Json(&'a T),
}

impl BatchMessage {
    /// Creates a batch message from raw bytes.
    pub fn new(topic: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            headers: Headers::new(),
        }
    }

    /// Creates a batch message from raw bytes, text or a JSON-serializable value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if a JSON payload cannot be marshaled.
    pub fn from_value<T>(
        topic: impl Into<String>,
        payload: BatchPayload<'_, T>,
        headers: Option<Headers>,
    ) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let data = match payload {
            BatchPayload::Bytes(bytes) => bytes,
            BatchPayload::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            BatchPayload::Json(value) => Bytes::from(serde_json::to_vec(value).map_err(Error::from)?),
        };

        Ok(Self {
            topic: topic.into(),
            data,
            headers: headers.unwrap_or_default(),
        })
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}
