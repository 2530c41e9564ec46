use crate::error::Error;
use crate::handler::{HandlerResult, MessageHandler, SharedHandler};
use crate::message::Message;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Retries a handler inside a single delivery attempt.
///
/// Independent of the subscription's own retry policy: a failing inner
/// handler is retried here first, and only the final failure reaches the
/// subscription.
pub struct RetryHandler {
    inner: SharedHandler,
    max_retries: u32,
    retry_delay: Duration,
}

/// Wraps `handler` with its own retry loop.
pub fn with_retries(handler: SharedHandler, max_retries: u32, retry_delay: Duration) -> SharedHandler {
    Arc::new(RetryHandler {
        inner: handler,
        max_retries,
        retry_delay,
    })
}

#[async_trait]
impl MessageHandler for RetryHandler {
    async fn handle(&self, message: Message) -> HandlerResult {
        let mut attempt = 0;

        loop {
            let error = match self.inner.handle(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            if attempt >= self.max_retries {
                return Err(Error::RetriesExhausted {
                    retries: self.max_retries,
                    source: error,
                }
                .into());
            }

            debug!(topic = %message.topic, attempt, error = %error, "retrying wrapped handler");

            tokio::time::sleep(self.retry_delay).await;
            attempt += 1;
        }
    }
}
