//! Checks applied to messages before they reach a backend.

use crate::error::{Error, Result};
use crate::message::{BatchMessage, Message};

/// Rejects empty topic names.
///
/// # Errors
///
/// Returns `Error::InvalidMessage` if the topic is empty or only whitespace.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(Error::InvalidMessage("topic cannot be empty".to_string()));
    }

    Ok(())
}

/// Validates a delivered or constructed message.
///
/// An empty payload is allowed; an empty topic is not.
///
/// # Errors
///
/// Returns `Error::InvalidMessage` when the message has no topic.
pub fn validate_message(message: &Message) -> Result<()> {
    validate_topic(&message.topic)
}

/// Validates every message of a batch before any of them is sent.
///
/// # Errors
///
/// Returns `Error::InvalidMessage` naming the position of the first invalid message.
pub fn validate_batch(messages: &[BatchMessage]) -> Result<()> {
    for (index, message) in messages.iter().enumerate() {
        validate_topic(&message.topic).map_err(|_| {
            Error::InvalidMessage(format!("batch message {index} has an empty topic"))
        })?;
    }

    Ok(())
}
