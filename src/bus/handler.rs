use std::future::Future;

use async_trait::async_trait;

use super::message::{Event, Message};
use crate::utils::error::HandlerError;

/// Processes a delivered message and returns the events it produced.
///
/// Returned events are published onto the context's topic in order, each one
/// before the next handler of the same message runs. Returning an error stops
/// the chain and leaves the message unacknowledged.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<Vec<Event>, HandlerError>;
}

/// A [`MessageHandler`] backed by an async closure. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Adapt an async closure into a [`MessageHandler`].
///
/// ```ignore
/// context.subscribe("greet", Arc::new(handler_fn(|message| async move {
///     Ok::<_, HandlerError>(vec![Message::new("greeted").with_data("to", message.get("name").cloned())])
/// })));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Event>, HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Event>, HandlerError>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<Vec<Event>, HandlerError> {
        (self.f)(message.clone()).await
    }
}
