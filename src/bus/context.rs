//! Bus context
//!
//! A `BusContext` binds one topic to one transport connection and composes
//! the subscription registry, the publisher and the dispatch engine over it.
//! It is created with [`Bus::create_context`](super::Bus::create_context) and
//! released with [`Bus::dispose_context`](super::Bus::dispose_context) or
//! [`BusContext::close`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::dispatch::{DispatchEngine, ListenOptions};
use super::handler::MessageHandler;
use super::message::Message;
use super::publisher::Publisher;
use super::registry::SubscriptionRegistry;
use crate::transport::{Channel, Connection};
use crate::utils::error::{BusError, TransportError};

pub struct BusContext {
    topic: String,
    connection: Arc<dyn Connection>,
    registry: Arc<SubscriptionRegistry>,
    publisher: Publisher,
    pub(super) dispatch: DispatchEngine,
    /// Set once `close` starts, before the connection goes away.
    closed: Arc<AtomicBool>,
}

impl BusContext {
    pub(crate) fn new(
        topic: String,
        connection: Arc<dyn Connection>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let publisher = Publisher::new(Arc::clone(&channel), topic.clone());
        let dispatch = DispatchEngine::new(channel, Arc::clone(&registry), publisher.clone());
        Self {
            topic,
            connection,
            registry,
            publisher,
            dispatch,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers `handler` for `message_type`, or for every type with
    /// [`WILDCARD`](super::WILDCARD). Takes effect for deliveries dispatched
    /// after this call, also while listening.
    pub fn subscribe(&self, message_type: &str, handler: Arc<dyn MessageHandler>) {
        self.registry.subscribe(message_type, handler);
    }

    /// Publishes `message` onto this context's topic. Every context bound to
    /// the topic receives a copy, this one included once it listens.
    pub async fn publish(&self, message: &Message) -> Result<(), BusError> {
        self.publisher.publish(message).await
    }

    /// Starts dispatching deliveries and runs until the connection is closed.
    ///
    /// Returns `Ok` when the context was closed through [`close`](Self::close)
    /// or [`Bus::dispose_context`](super::Bus::dispose_context), and
    /// `TransportError::ConnectionClosed` when the broker side went away.
    /// Fails early if the queue cannot be set up. Handler failures never end
    /// the listen loop; they are logged and leave their message unacknowledged.
    pub async fn listen(&self, options: ListenOptions) -> Result<(), BusError> {
        let deliveries = self.dispatch.bind(options).await?;
        self.dispatch.run(deliveries).await;
        stream_ended(&self.topic, &self.closed)
    }

    /// Like [`listen`](Self::listen), but returns once the queue is bound and
    /// dispatches on a background task. Messages published after this returns
    /// are guaranteed to reach the context. The task yields what `listen`
    /// would have returned.
    pub async fn spawn_listener(
        &self,
        options: ListenOptions,
    ) -> Result<JoinHandle<Result<(), BusError>>, BusError> {
        let deliveries = self.dispatch.bind(options).await?;
        let dispatch = self.dispatch.clone();
        let topic = self.topic.clone();
        let closed = Arc::clone(&self.closed);
        Ok(tokio::spawn(async move {
            dispatch.run(deliveries).await;
            stream_ended(&topic, &closed)
        }))
    }

    /// Closes the transport connection. Dispatch stops; pipelines already
    /// running are not cancelled, but their acks and publishes will fail.
    pub async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::SeqCst);
        self.connection.close().await?;
        info!(topic = %self.topic, "context closed");
        Ok(())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

fn stream_ended(topic: &str, closed: &AtomicBool) -> Result<(), BusError> {
    if closed.load(Ordering::SeqCst) {
        return Ok(());
    }
    warn!(topic, "delivery stream ended without close");
    Err(TransportError::ConnectionClosed.into())
}
