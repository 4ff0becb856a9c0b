//! The `transport` module is the Broker Transport contract the bus consumes.
//!
//! A [`Transport`] connects to a broker and yields a [`Connection`]; channels
//! opened on it declare fanout topics and exclusive queues, bind them, cap
//! unacknowledged deliveries, publish, consume with manual ACK, and ACK.
//!
//! Three implementations ship with the crate:
//!
//! - [`amqp::AmqpTransport`]: talks AMQP 0-9-1 to RabbitMQ or a compatible broker.
//! - [`memory::MemoryTransport`]: talks to an in-process [`Broker`](crate::broker::Broker).
//! - [`websocket::WebSocketTransport`]: talks to the fanbus broker server over WebSockets.

pub mod amqp;
pub mod memory;
pub mod message;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::BrokerSettings;
use crate::utils::error::TransportError;

pub use amqp::AmqpTransport;
pub use memory::MemoryTransport;
pub use websocket::WebSocketTransport;

pub type QueueId = String;
pub type DeliveryTag = u64;

/// A message handed to a consumer. It stays unacknowledged until
/// [`Channel::ack`] is called with its tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    /// Milliseconds since UNIX epoch, set by the broker on publish.
    pub published_at: i64,
}

impl Delivery {
    /// When the broker accepted the publish.
    pub fn published_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.published_at)
    }
}

/// Deliveries for one consumer. The stream ends when the consumer is
/// cancelled or its connection closes.
pub type DeliveryStream = UnboundedReceiver<Delivery>;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

impl ConnectionOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

impl From<&BrokerSettings> for ConnectionOptions {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Connection>, TransportError>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError>;

    /// Closes the connection. Exclusive queues declared on it are deleted and
    /// their consumers' delivery streams end.
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn declare_fanout_topic(&self, name: &str) -> Result<(), TransportError>;

    async fn declare_exclusive_queue(&self) -> Result<QueueId, TransportError>;

    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError>;

    /// At most `limit` deliveries are outstanding per consumer on this
    /// channel; `0` removes the cap.
    async fn set_unacknowledged_limit(&self, limit: u16) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Starts a manual-ACK consumer on `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError>;

    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError>;

    /// Closes the channel. Its consumers' delivery streams end and every
    /// delivery it left unacknowledged goes back to the front of its queue.
    /// The connection stays open.
    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests;
