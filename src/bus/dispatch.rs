//! Dispatch engine
//!
//! Drives the consume, resolve, invoke, republish, ack cycle for one context:
//! - `bind` declares an exclusive queue, binds it to the topic, applies the
//!   admission limit as the channel's unacknowledged-delivery cap and starts
//!   consuming with manual acks
//! - `run` spawns one pipeline task per delivery
//! - `process` is a single pipeline: handlers run strictly one after another,
//!   each returned event is published before the next handler starts, and the
//!   delivery is acked only after the whole chain succeeded
//!
//! There is no semaphore here. At most `max_concurrent_handlers` pipelines
//! are in flight because the transport holds further deliveries back until
//! an earlier one is acked.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use super::message::Message;
use super::publisher::Publisher;
use super::registry::SubscriptionRegistry;
use crate::config::DispatchSettings;
use crate::transport::{Channel, Delivery, DeliveryStream};
use crate::utils::error::BusError;

/// How a context listens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenOptions {
    /// Unacknowledged deliveries allowed at once, i.e. message pipelines in
    /// flight. `None` or `Some(0)` keeps the transport default, which does
    /// not cap deliveries.
    pub max_concurrent_handlers: Option<u16>,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_handlers(mut self, limit: u16) -> Self {
        self.max_concurrent_handlers = Some(limit);
        self
    }

    fn limit(&self) -> Option<u16> {
        self.max_concurrent_handlers.filter(|limit| *limit > 0)
    }
}

impl From<&DispatchSettings> for ListenOptions {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            max_concurrent_handlers: settings.max_concurrent_handlers,
        }
    }
}

#[derive(Clone)]
pub struct DispatchEngine {
    channel: Arc<dyn Channel>,
    registry: Arc<SubscriptionRegistry>,
    publisher: Publisher,
}

impl DispatchEngine {
    pub fn new(
        channel: Arc<dyn Channel>,
        registry: Arc<SubscriptionRegistry>,
        publisher: Publisher,
    ) -> Self {
        Self {
            channel,
            registry,
            publisher,
        }
    }

    /// Sets up this context's exclusive queue and starts consuming it.
    pub async fn bind(&self, options: ListenOptions) -> Result<DeliveryStream, BusError> {
        let topic = self.publisher.topic();
        let queue = self.channel.declare_exclusive_queue().await?;
        self.channel.bind_queue(&queue, topic).await?;

        if let Some(limit) = options.limit() {
            self.channel.set_unacknowledged_limit(limit).await?;
        }

        let deliveries = self.channel.consume(&queue).await?;
        info!(
            topic,
            %queue,
            max_concurrent_handlers = ?options.limit(),
            "listening"
        );
        Ok(deliveries)
    }

    /// Spawns a pipeline for every delivery until the stream ends.
    ///
    /// Pipelines are detached: returning from here does not cancel the ones
    /// still running.
    pub async fn run(&self, mut deliveries: DeliveryStream) {
        while let Some(delivery) = deliveries.recv().await {
            self.spawn_pipeline(delivery);
        }
        debug!(topic = self.publisher.topic(), "delivery stream ended");
    }

    fn spawn_pipeline(&self, delivery: Delivery) {
        let engine = self.clone();
        tokio::spawn(async move {
            let tag = delivery.tag;
            if let Err(e) = engine.process(delivery).await {
                error!(
                    topic = engine.publisher.topic(),
                    tag, "message left unacknowledged: {e}"
                );
            }
        });
    }

    /// Handles one delivery end to end. On error the delivery is not acked
    /// and the remaining handlers of the chain are skipped.
    pub async fn process(&self, delivery: Delivery) -> Result<(), BusError> {
        let message = Message::from_bytes(&delivery.payload)?;
        let handlers = self.registry.resolve(message.message_type());
        let queued_ms = delivery
            .published_time()
            .map(|published| (Utc::now() - published).num_milliseconds());
        debug!(
            message_type = message.message_type(),
            tag = delivery.tag,
            handlers = handlers.len(),
            queued_ms,
            "dispatching"
        );

        for handler in handlers {
            let events = handler.handle(&message).await?;
            for event in &events {
                self.publisher.publish(event).await?;
            }
        }

        self.channel.ack(delivery.tag).await?;
        Ok(())
    }
}
