//! Bus - creates and disposes contexts over one transport.

use std::sync::{Arc, Mutex};

use tracing::info;

use super::context::BusContext;
use crate::broker::Broker;
use crate::config::TransportKind;
use crate::transport::{
    AmqpTransport, ConnectionOptions, MemoryTransport, Transport, WebSocketTransport,
};
use crate::utils::error::BusError;

/// Entry point of the bus.
///
/// A `Bus` owns the transport every context it creates connects through.
///
/// ## Example
///
/// ```ignore
/// let bus = Bus::amqp();
/// let context = bus.create_context("orders", &ConnectionOptions::default()).await?;
/// context.subscribe("order_placed", Arc::new(handler_fn(|message| async move {
///     Ok::<_, HandlerError>(vec![Message::new("order_confirmed").with_data("id", message.get("id").cloned())])
/// })));
/// let listener = context.spawn_listener(ListenOptions::new().max_concurrent_handlers(4)).await?;
/// context.publish(&Message::new("order_placed").with_data("id", 7)).await?;
/// ```
#[derive(Clone)]
pub struct Bus {
    transport: Arc<dyn Transport>,
}

impl Bus {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// A bus whose contexts share the given in-process broker.
    pub fn in_memory(broker: Arc<Mutex<Broker>>) -> Self {
        Self::new(Arc::new(MemoryTransport::new(broker)))
    }

    /// A bus whose contexts connect to RabbitMQ or another AMQP 0-9-1 broker.
    pub fn amqp() -> Self {
        Self::new(Arc::new(AmqpTransport::new()))
    }

    /// A bus whose contexts connect to a fanbus broker server.
    pub fn websocket() -> Self {
        Self::new(Arc::new(WebSocketTransport::new()))
    }

    /// A network bus speaking the configured protocol.
    pub fn for_transport(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Amqp => Self::amqp(),
            TransportKind::WebSocket => Self::websocket(),
        }
    }

    /// Connects, opens a channel and declares `topic` as a fanout topic.
    pub async fn create_context(
        &self,
        topic: &str,
        options: &ConnectionOptions,
    ) -> Result<BusContext, BusError> {
        let connection = self.transport.connect(options).await?;
        let channel = connection.open_channel().await?;
        channel.declare_fanout_topic(topic).await?;

        info!(topic, host = %options.host, port = options.port, "context created");
        Ok(BusContext::new(topic.to_string(), connection, channel))
    }

    /// Releases the context's connection, which stops its dispatch.
    pub async fn dispose_context(&self, context: &BusContext) -> Result<(), BusError> {
        context.close().await
    }
}
