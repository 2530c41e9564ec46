//! Bookkeeping for active subscriptions, shared by the adapters.

use crate::error::{Error, Result};
use crate::options::SubscribeOptions;

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// An active subscription and the workers delivering to it.
#[derive(Debug)]
pub struct Subscription<R> {
    topic: String,
    options: SubscribeOptions,
    cancel: CancellationToken,
    tasks: TaskTracker,
    resource: R,
}

impl<R> Subscription<R> {
    /// Creates a subscription whose workers stop when `cancel` is cancelled.
    pub fn new(
        topic: impl Into<String>,
        options: SubscribeOptions,
        cancel: CancellationToken,
        resource: R,
    ) -> Self {
        Self {
            topic: topic.into(),
            options,
            cancel,
            tasks: TaskTracker::new(),
            resource,
        }
    }

    /// Spawns a delivery task tracked by this subscription.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Topic of the subscription.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Options the subscription was created with.
    #[must_use]
    pub const fn options(&self) -> &SubscribeOptions {
        &self.options
    }

    /// Cancellation token observed by the workers.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Backend-native resource backing the subscription.
    #[must_use]
    pub const fn resource(&self) -> &R {
        &self.resource
    }

    /// Cancels the workers, waits for in-flight handlers, and hands back the resource.
    pub async fn shutdown(self) -> R {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        debug!(topic = %self.topic, "subscription workers stopped");

        self.resource
    }
}

/// Registry of subscriptions keyed by topic.
///
/// The registry lock is meant to be held for a whole subscribe or unsubscribe
/// call so the two cannot interleave on the same adapter.
#[derive(Debug)]
pub struct SubscriptionRegistry<R> {
    subscriptions: Mutex<HashMap<String, Subscription<R>>>,
}

impl<R> Default for SubscriptionRegistry<R> {
    fn default() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

impl<R> SubscriptionRegistry<R> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the registry.
    pub async fn lock(&self) -> RegistryGuard<'_, R> {
        RegistryGuard {
            subscriptions: self.subscriptions.lock().await,
        }
    }

    /// Number of active subscriptions.
    pub async fn len(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Whether there are no active subscriptions.
    pub async fn is_empty(&self) -> bool {
        self.subscriptions.lock().await.is_empty()
    }

    /// Topics with an active subscription.
    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.lock().await.keys().cloned().collect();
        topics.sort();
        topics
    }
}

/// Exclusive access to a [`SubscriptionRegistry`].
#[derive(Debug)]
pub struct RegistryGuard<'a, R> {
    subscriptions: MutexGuard<'a, HashMap<String, Subscription<R>>>,
}

impl<R> RegistryGuard<'_, R> {
    /// Registers a subscription. The caller must have drained any previous one.
    pub fn insert(&mut self, subscription: Subscription<R>) {
        self.subscriptions
            .insert(subscription.topic.clone(), subscription);
    }

    /// Removes the subscription for `topic`, if any.
    pub fn take(&mut self, topic: &str) -> Option<Subscription<R>> {
        self.subscriptions.remove(topic)
    }

    /// Removes the subscription for `topic`.
    ///
    /// # Errors
    ///
    /// Returns `Error::SubscriptionNotFound` if no subscription exists.
    pub fn remove(&mut self, topic: &str) -> Result<Subscription<R>> {
        self.take(topic)
            .ok_or_else(|| Error::SubscriptionNotFound(topic.to_string()))
    }

    /// Removes every subscription.
    pub fn drain(&mut self) -> Vec<Subscription<R>> {
        self.subscriptions.drain().map(|(_, s)| s).collect()
    }
}
