use crate::error::Error;
use crate::handler::{HandlerResult, MessageHandler, SharedHandler};
use crate::message::Message;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

/// Fails a delivery attempt whose handler runs longer than a deadline.
///
/// The handler runs on its own task. When the deadline passes, the attempt
/// fails with `Error::Timeout` but the task keeps running until it finishes
/// on its own.
pub struct TimeoutHandler {
    inner: SharedHandler,
    timeout: Duration,
}

/// Wraps `handler` so each attempt fails after `timeout`.
pub fn with_timeout(handler: SharedHandler, timeout: Duration) -> SharedHandler {
    Arc::new(TimeoutHandler {
        inner: handler,
        timeout,
    })
}

#[async_trait]
impl MessageHandler for TimeoutHandler {
    async fn handle(&self, message: Message) -> HandlerResult {
        let inner = self.inner.clone();
        let topic = message.topic.clone();
        let task = tokio::spawn(async move { inner.handle(message).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(join_error.into()),
            Err(_) => {
                warn!(%topic, timeout = ?self.timeout, "message handler timed out");
                Err(Error::Timeout(self.timeout).into())
            }
        }
    }
}
