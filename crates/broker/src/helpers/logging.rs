use crate::handler::{HandlerResult, MessageHandler, SharedHandler};
use crate::message::Message;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, debug, error, info, info_span};

/// Logs the start, outcome and duration of every attempt.
pub struct LoggingHandler {
    inner: SharedHandler,
}

/// Wraps `handler` with structured logging.
pub fn with_logging(handler: SharedHandler) -> SharedHandler {
    Arc::new(LoggingHandler { inner: handler })
}

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: Message) -> HandlerResult {
        let span = info_span!(
            "handle_message",
            topic = %message.topic,
            id = %message.id,
            retry = message.retry
        );

        async move {
            let started = Instant::now();
            debug!("processing message");

            let result = self.inner.handle(message).await;
            let duration = started.elapsed();

            match &result {
                Ok(()) => info!(?duration, "message processed"),
                Err(e) => error!(?duration, error = %e, "message processing failed"),
            }

            result
        }
        .instrument(span)
        .await
    }
}
