use crate::error::Error;
use crate::handler::{HandlerResult, MessageHandler, SharedHandler};
use crate::message::Message;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Handler that decodes JSON payloads into `T` before calling `f`.
pub struct JsonHandler<T, F> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> Debug for JsonHandler<T, F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("JsonHandler")
            .field("type", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// Builds a handler that deserializes each payload as `T`.
///
/// A payload that does not decode fails the attempt with `Error::Serialization`.
pub fn json_handler<T, F, Fut>(f: F) -> SharedHandler
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(JsonHandler {
        f,
        _marker: PhantomData,
    })
}

#[async_trait]
impl<T, F, Fut> MessageHandler for JsonHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, message: Message) -> HandlerResult {
        let value: T = serde_json::from_slice(&message.data).map_err(Error::from)?;

        (self.f)(value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[tokio::test]
    async fn test_decodes_payload() {
        let received = Arc::new(Mutex::new(None));
        let handler = json_handler({
            let received = received.clone();
            move |order: Order| {
                let received = received.clone();
                async move {
                    *received.lock() = Some(order);
                    Ok(())
                }
            }
        });

        handler
            .handle(Message::new("1", "orders", r#"{"id":1,"sku":"A-1"}"#))
            .await
            .unwrap();

        assert_eq!(
            *received.lock(),
            Some(Order {
                id: 1,
                sku: "A-1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_serialization_error() {
        let handler = json_handler(|_order: Order| async { Ok(()) });

        let error = handler
            .handle(Message::new("1", "orders", "not json"))
            .await
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::Serialization(_))
        ));
    }
}
