use crate::handler::{HandlerResult, MessageHandler};
use crate::message::Message;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

type FlushFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type FlushFn = dyn Fn(Vec<Message>) -> FlushFuture + Send + Sync;

struct Accumulator {
    pending: Vec<Message>,
    last_flush: Instant,
}

/// Accumulates messages and hands them to a callback in batches.
///
/// A batch is flushed when it reaches `batch_size` or when `flush_interval`
/// has elapsed since the previous flush. Flushing happens on the delivery of
/// the message that triggers it, so the triggering delivery reports the
/// outcome of the whole batch. A failed batch is dropped, not retried.
pub struct BatchHandler {
    batch_size: usize,
    flush_interval: Duration,
    flush: Box<FlushFn>,
    state: Mutex<Accumulator>,
}

impl std::fmt::Debug for BatchHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandler")
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}

impl BatchHandler {
    /// Creates a batching handler.
    pub fn new<F, Fut>(batch_size: usize, flush_interval: Duration, flush: F) -> Arc<Self>
    where
        F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Arc::new(Self {
            batch_size: batch_size.max(1),
            flush_interval,
            flush: Box::new(move |messages| Box::pin(flush(messages))),
            state: Mutex::new(Accumulator {
                pending: Vec::with_capacity(batch_size),
                last_flush: Instant::now(),
            }),
        })
    }

    /// Number of messages waiting for the next flush.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

#[async_trait]
impl MessageHandler for BatchHandler {
    async fn handle(&self, message: Message) -> HandlerResult {
        let mut state = self.state.lock().await;
        state.pending.push(message);

        let full = state.pending.len() >= self.batch_size;
        let stale = state.last_flush.elapsed() >= self.flush_interval;
        if !full && !stale {
            return Ok(());
        }

        let batch = std::mem::take(&mut state.pending);
        state.last_flush = Instant::now();

        (self.flush)(batch).await
    }
}
