use crate::error::Error;
use crate::handler::{HandlerResult, MessageHandler, SharedHandler};
use crate::message::Message;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// State of a [`CircuitBreaker`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,

    /// Calls are rejected until the cooldown elapses.
    Open,

    /// A trial call is allowed through.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Stops calling a handler after repeated failures.
///
/// Opens after `max_failures` consecutive failures. Once `reset_after` has
/// passed since the last failure, the next call goes through in the half-open
/// state: success closes the breaker and clears the failure count, failure
/// opens it again.
pub struct CircuitBreaker {
    inner: SharedHandler,
    max_failures: u32,
    reset_after: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Wraps `handler` in a closed breaker.
    pub fn new(handler: SharedHandler, max_failures: u32, reset_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: handler,
            max_failures: max_failures.max(1),
            reset_after,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
        })
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Consecutive failures recorded.
    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    fn admit(&self) -> bool {
        let mut guard = self.state.lock();

        if guard.state != CircuitState::Open {
            return true;
        }

        let cooled_down = guard
            .last_failure
            .is_none_or(|at| at.elapsed() >= self.reset_after);

        if cooled_down {
            guard.state = CircuitState::HalfOpen;
            info!("circuit breaker half-open");
        }

        cooled_down
    }

    fn record(&self, succeeded: bool) {
        let mut guard = self.state.lock();

        if succeeded {
            if guard.state == CircuitState::HalfOpen {
                info!("circuit breaker closed");
            }
            guard.state = CircuitState::Closed;
            guard.failures = 0;
            return;
        }

        guard.failures = guard.failures.saturating_add(1);
        guard.last_failure = Some(Instant::now());

        if guard.state == CircuitState::HalfOpen || guard.failures >= self.max_failures {
            if guard.state != CircuitState::Open {
                warn!(failures = guard.failures, "circuit breaker opened");
            }
            guard.state = CircuitState::Open;
        }
    }
}

#[async_trait]
impl MessageHandler for CircuitBreaker {
    async fn handle(&self, message: Message) -> HandlerResult {
        if !self.admit() {
            return Err(Error::CircuitOpen.into());
        }

        let result = self.inner.handle(message).await;
        self.record(result.is_ok());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use assert_matches::assert_matches;

    #[tokio::test(start_paused = true)]
    async fn test_opens_rejects_then_recovers_through_half_open() {
        let calls = Arc::new(AtomicU32::new(0));
        let healthy = Arc::new(AtomicBool::new(false));
        let inner = handler_fn({
            let calls = calls.clone();
            let healthy = healthy.clone();
            move |_message: Message| {
                let calls = calls.clone();
                let healthy = healthy.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if healthy.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        HandlerResult::Err("downstream unavailable".into())
                    }
                }
            }
        });

        let breaker = CircuitBreaker::new(inner, 3, Duration::from_secs(30));
        let message = || Message::new("1", "orders", "payload");

        for _ in 0..3 {
            assert!(breaker.handle(message()).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let rejected = breaker.handle(message()).await.unwrap_err();
        assert_matches!(rejected.downcast_ref::<Error>(), Some(Error::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(31)).await;
        healthy.store(true, Ordering::SeqCst);

        assert!(breaker.handle(message()).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let inner = handler_fn(|_message: Message| async { HandlerResult::Err("still down".into()) });
        let breaker = CircuitBreaker::new(inner, 1, Duration::from_secs(5));

        assert!(breaker.handle(Message::new("1", "orders", "")).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(6)).await;
        let error = breaker
            .handle(Message::new("2", "orders", ""))
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "still down");
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let inner = handler_fn({
            let calls = calls.clone();
            move |_message: Message| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                        HandlerResult::Err("odd".into())
                    } else {
                        Ok(())
                    }
                }
            }
        });
        let breaker = CircuitBreaker::new(inner, 2, Duration::from_secs(5));

        for _ in 0..6 {
            let _ = breaker.handle(Message::new("1", "orders", "")).await;
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
