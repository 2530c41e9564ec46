use crate::error::BoxError;
use crate::message::Message;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

/// Error returned by message handlers.
pub type HandlerError = BoxError;

/// Result returned by message handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Processes messages delivered to a subscription.
#[async_trait]
pub trait MessageHandler
where
    Self: Send + Sync + 'static,
{
    /// Handles a single delivery attempt of a message.
    async fn handle(&self, message: Message) -> HandlerResult;
}

/// A handler shared between delivery workers.
pub type SharedHandler = Arc<dyn MessageHandler>;

#[async_trait]
impl<H> MessageHandler for Arc<H>
where
    H: MessageHandler + ?Sized,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        (**self).handle(message).await
    }
}

/// Handler backed by an async closure. Built with [`handler_fn`].
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        (self.f)(message).await
    }
}

/// Wraps an async closure into a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(HandlerFn { f })
}
