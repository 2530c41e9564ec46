use crate::error::Error;
use crate::handler::{HandlerResult, MessageHandler, SharedHandler};
use crate::message::Message;

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;

/// Route matching every topic without an exact route.
pub const WILDCARD_ROUTE: &str = "*";

/// Dispatches messages to handlers by exact topic, falling back to `*`.
#[derive(Default)]
pub struct MessageRouter {
    routes: HashMap<String, SharedHandler>,
}

impl Debug for MessageRouter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut topics: Vec<&String> = self.routes.keys().collect();
        topics.sort();
        f.debug_struct("MessageRouter")
            .field("routes", &topics)
            .finish()
    }
}

impl MessageRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the route for `topic`.
    #[must_use]
    pub fn route(mut self, topic: impl Into<String>, handler: SharedHandler) -> Self {
        self.routes.insert(topic.into(), handler);
        self
    }

    /// Adds the fallback route.
    #[must_use]
    pub fn fallback(self, handler: SharedHandler) -> Self {
        self.route(WILDCARD_ROUTE, handler)
    }

    /// Finishes the router as a shareable handler.
    #[must_use]
    pub fn build(self) -> SharedHandler {
        Arc::new(self)
    }
}

#[async_trait]
impl MessageHandler for MessageRouter {
    async fn handle(&self, message: Message) -> HandlerResult {
        let handler = self
            .routes
            .get(&message.topic)
            .or_else(|| self.routes.get(WILDCARD_ROUTE))
            .ok_or_else(|| Error::NoRoute(message.topic.clone()))?;

        handler.handle(message).await
    }
}
