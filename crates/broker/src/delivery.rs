//! Retry loop shared by every adapter.
//!
//! Adapters build the [`Message`] envelope, call [`deliver`], and map the
//! returned [`DeliveryOutcome`] onto their native acknowledgement primitive.

use crate::handler::{HandlerError, MessageHandler, SharedHandler};
use crate::message::{Headers, Message};
use crate::options::{PublishOptions, SubscribeOptions};
use crate::stats::Counters;
use crate::subscription::Subscription;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Header naming the topic a dead-lettered message originally arrived on.
pub const DEAD_LETTER_TOPIC_HEADER: &str = "dead-letter.topic";

/// Header carrying the last handler error of a dead-lettered message.
pub const DEAD_LETTER_ERROR_HEADER: &str = "dead-letter.error";

/// Header carrying the retry count of a dead-lettered message.
pub const DEAD_LETTER_RETRIES_HEADER: &str = "dead-letter.retries";

/// Retry settings of a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,

    /// Sleep between attempts.
    pub retry_delay: Duration,

    /// Destination for messages whose retries are exhausted.
    pub dead_letter_topic: Option<String>,
}

impl From<&SubscribeOptions> for RetryPolicy {
    fn from(options: &SubscribeOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            retry_delay: options.retry_delay,
            dead_letter_topic: options.dead_letter_topic.clone(),
        }
    }
}

/// Result of delivering a message to a handler.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The handler succeeded.
    Succeeded,

    /// Every attempt failed. Carries the last handler error.
    Exhausted(HandlerError),

    /// The subscription was cancelled while waiting to retry.
    Abandoned,
}

impl DeliveryOutcome {
    /// Whether the handler eventually succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Invokes `handler` until it succeeds or `policy.max_retries` retries are used up.
///
/// The retry sleep blocks the calling worker only. Cancelling `cancel` interrupts
/// the sleep (never a running handler) and yields [`DeliveryOutcome::Abandoned`].
pub async fn deliver<H>(
    handler: &H,
    message: &mut Message,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> DeliveryOutcome
where
    H: MessageHandler + ?Sized,
{
    message.retry = 0;
    message.max_retries = policy.max_retries;

    loop {
        let error = match handler.handle(message.clone()).await {
            Ok(()) => {
                debug!(topic = %message.topic, id = %message.id, retry = message.retry, "message handled");
                return DeliveryOutcome::Succeeded;
            }
            Err(error) => error,
        };

        if message.retry >= policy.max_retries {
            error!(
                topic = %message.topic,
                id = %message.id,
                retries = policy.max_retries,
                error = %error,
                "failed to process message after all retries"
            );
            return DeliveryOutcome::Exhausted(error);
        }

        warn!(
            topic = %message.topic,
            id = %message.id,
            retry = message.retry,
            max_retries = policy.max_retries,
            delay = ?policy.retry_delay,
            error = %error,
            "message handler failed, retrying"
        );

        tokio::select! {
            () = cancel.cancelled() => {
                debug!(topic = %message.topic, id = %message.id, "subscription cancelled during retry wait");
                return DeliveryOutcome::Abandoned;
            }
            () = tokio::time::sleep(policy.retry_delay) => {}
        }

        message.retry += 1;
    }
}

/// Builds the payload and options used to dead-letter `message`.
#[must_use]
pub fn dead_letter_options(message: &Message, error: &HandlerError) -> PublishOptions {
    let mut headers: Headers = message.headers.clone();
    headers.insert(DEAD_LETTER_TOPIC_HEADER.to_string(), message.topic.clone());
    headers.insert(DEAD_LETTER_ERROR_HEADER.to_string(), error.to_string());
    headers.insert(
        DEAD_LETTER_RETRIES_HEADER.to_string(),
        message.retry.to_string(),
    );

    PublishOptions {
        headers,
        persistent: true,
        ..PublishOptions::default()
    }
}

/// Maps a delivery outcome onto the backend's acknowledgement primitive.
#[async_trait]
pub trait Settle
where
    Self: Send + Sync + 'static,
{
    /// Acknowledges, rejects or dead-letters `message` according to `outcome`.
    async fn settle(&self, message: Message, outcome: DeliveryOutcome);
}

/// Everything a delivery worker needs besides its input channel.
#[derive(Clone)]
pub struct WorkerContext {
    /// Handler receiving the messages.
    pub handler: SharedHandler,

    /// Retry policy of the subscription.
    pub policy: RetryPolicy,

    /// Acknowledgement strategy of the backend.
    pub settle: Arc<dyn Settle>,

    /// Adapter-wide counters.
    pub counters: Arc<Counters>,

    /// Stops the worker once its in-flight message is settled.
    pub cancel: CancellationToken,
}

/// Delivers messages from `receiver` until it closes or the worker is cancelled.
pub async fn run_worker(receiver: flume::Receiver<Message>, context: WorkerContext) {
    loop {
        let mut message = tokio::select! {
            biased;
            () = context.cancel.cancelled() => break,
            received = receiver.recv_async() => match received {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        context.counters.record_consumed();

        let outcome = deliver(
            &*context.handler,
            &mut message,
            &context.policy,
            &context.cancel,
        )
        .await;

        context.settle.settle(message, outcome).await;
    }

    trace!("delivery worker stopped");
}

/// Starts the delivery pipeline of a subscription.
///
/// One pump task forwards `stream` into a bounded channel read by
/// `options.worker_count()` workers. Every task runs on the subscription's
/// tracker and stops when the subscription is cancelled.
pub fn spawn_delivery<R, S>(
    subscription: &Subscription<R>,
    stream: S,
    handler: SharedHandler,
    settle: Arc<dyn Settle>,
    counters: Arc<Counters>,
) where
    S: Stream<Item = Message> + Send + Unpin + 'static,
{
    let options = subscription.options();
    let workers = options.worker_count();
    let capacity = usize::from(options.prefetch_count).max(workers);
    let (sender, receiver) = flume::bounded(capacity);

    let context = WorkerContext {
        handler,
        policy: RetryPolicy::from(options),
        settle,
        counters,
        cancel: subscription.cancel_token().clone(),
    };

    for _ in 0..workers {
        subscription.spawn(run_worker(receiver.clone(), context.clone()));
    }

    let cancel = subscription.cancel_token().clone();
    let topic = subscription.topic().to_string();
    subscription.spawn(pump(stream, sender, cancel, topic));
}

async fn pump<S>(
    mut stream: S,
    sender: flume::Sender<Message>,
    cancel: CancellationToken,
    topic: String,
) where
    S: Stream<Item = Message> + Send + Unpin + 'static,
{
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(message) => message,
                None => {
                    debug!(%topic, "consumer stream ended");
                    break;
                }
            },
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = sender.send_async(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerResult, handler_fn};

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    fn policy(max_retries: u32, retry_delay: Duration) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay,
            dead_letter_topic: None,
        }
    }

    #[tokio::test]
    async fn test_always_failing_handler_is_invoked_max_retries_plus_one_times() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = handler_fn({
            let seen = seen.clone();
            move |message: Message| {
                let seen = seen.clone();
                async move {
                    seen.lock().push((message.retry, message.max_retries));
                    HandlerResult::Err("boom".into())
                }
            }
        });

        let mut message = Message::new("1", "orders", "payload");
        let outcome = deliver(
            &handler,
            &mut message,
            &policy(3, Duration::ZERO),
            &CancellationToken::new(),
        )
        .await;

        assert_matches!(outcome, DeliveryOutcome::Exhausted(e) if e.to_string() == "boom");
        assert_eq!(*seen.lock(), vec![(0, 3), (1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_success_short_circuits_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = handler_fn({
            let calls = calls.clone();
            move |_message: Message| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) + 1 < 2 {
                        HandlerResult::Err("transient".into())
                    } else {
                        Ok(())
                    }
                }
            }
        });

        let mut message = Message::new("1", "orders", "payload");
        let outcome = deliver(
            &handler,
            &mut message,
            &policy(5, Duration::ZERO),
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(message.retry, 1);
    }

    #[tokio::test]
    async fn test_two_failures_then_success_waits_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = handler_fn({
            let calls = calls.clone();
            move |_message: Message| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        HandlerResult::Err("not yet".into())
                    } else {
                        Ok(())
                    }
                }
            }
        });

        let started = Instant::now();
        let mut message = Message::new("1", "orders", "payload");
        let outcome = deliver(
            &handler,
            &mut message,
            &policy(2, Duration::from_millis(10)),
            &CancellationToken::new(),
        )
        .await;

        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_cancellation_during_retry_wait_abandons_message() {
        let handler = handler_fn(|_message: Message| async { HandlerResult::Err("down".into()) });
        let cancel = CancellationToken::new();
        let mut message = Message::new("1", "orders", "payload");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = deliver(
            &handler,
            &mut message,
            &policy(10, Duration::from_secs(60)),
            &cancel,
        )
        .await;

        assert_matches!(outcome, DeliveryOutcome::Abandoned);
        assert_eq!(message.retry, 0);
    }

    #[derive(Default)]
    struct RecordingSettle {
        settled: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl Settle for RecordingSettle {
        async fn settle(&self, message: Message, outcome: DeliveryOutcome) {
            self.settled.lock().push((message.id, outcome.is_success()));
        }
    }

    #[tokio::test]
    async fn test_spawned_workers_settle_every_message() {
        let options = SubscribeOptions {
            concurrency: 2,
            max_retries: 0,
            retry_delay: Duration::ZERO,
            ..SubscribeOptions::default()
        };
        let subscription = Subscription::new("orders", options, CancellationToken::new(), ());
        let settle = Arc::new(RecordingSettle::default());
        let counters = Arc::new(Counters::default());
        let handler = handler_fn(|message: Message| async move {
            if message.id == "3" {
                HandlerResult::Err("rejected".into())
            } else {
                Ok(())
            }
        });

        let stream =
            futures::stream::iter((0..5).map(|i| Message::new(i.to_string(), "orders", "x")));
        spawn_delivery(&subscription, stream, handler, settle.clone(), counters.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while settle.settled.lock().len() < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        subscription.shutdown().await;

        let mut settled = settle.settled.lock().clone();
        settled.sort();
        assert_eq!(counters.consumed(), 5);
        assert_eq!(
            settled,
            vec![
                ("0".to_string(), true),
                ("1".to_string(), true),
                ("2".to_string(), true),
                ("3".to_string(), false),
                ("4".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_dead_letter_options_carry_origin() {
        let mut message = Message::new("1", "orders", "payload");
        message.retry = 2;
        let error: HandlerError = "bad payload".into();

        let options = dead_letter_options(&message, &error);

        assert!(options.persistent);
        assert_eq!(options.headers[DEAD_LETTER_TOPIC_HEADER], "orders");
        assert_eq!(options.headers[DEAD_LETTER_ERROR_HEADER], "bad payload");
        assert_eq!(options.headers[DEAD_LETTER_RETRIES_HEADER], "2");
    }
}
