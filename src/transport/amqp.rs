//! AMQP 0-9-1 transport
//!
//! Talks to a RabbitMQ-compatible broker through `lapin`:
//! - a topic is a fanout exchange, published to with an empty routing key
//! - a context queue is a server-named exclusive queue
//! - the unacknowledged limit is the channel's `basic.qos` prefetch
//!
//! Each consumer gets a forwarding task that turns `lapin` deliveries into
//! [`Delivery`] values. The delivery stream ends when the consumer is
//! cancelled or the connection goes away.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Channel, Connection, ConnectionOptions, Delivery, DeliveryStream, DeliveryTag, QueueId,
    Transport,
};
use crate::utils::error::TransportError;

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

/// AMQP reply code RabbitMQ closes the handshake with on bad credentials.
const ACCESS_REFUSED: u16 = 403;

#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpTransport;

impl AmqpTransport {
    pub fn new() -> Self {
        Self
    }
}

/// The broker address for `options`, on the default `/` vhost.
pub fn amqp_uri(options: &ConnectionOptions) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: options.username.clone(),
                password: options.password.clone(),
            },
            host: options.host.clone(),
            port: options.port,
        },
        ..AMQPUri::default()
    }
}

/// Maps a failed handshake onto the transport's error kinds.
fn connect_error(options: &ConnectionOptions, err: lapin::Error) -> TransportError {
    match err {
        lapin::Error::ProtocolError(e) if e.get_id() == ACCESS_REFUSED => {
            TransportError::AuthenticationFailed(options.username.clone())
        }
        lapin::Error::IOError(e) => {
            TransportError::ConnectionRefused(format!("{}:{}: {e}", options.host, options.port))
        }
        other => TransportError::Amqp(other),
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Connection>, TransportError> {
        let inner = lapin::Connection::connect_uri(amqp_uri(options), ConnectionProperties::default())
            .await
            .map_err(|e| connect_error(options, e))?;

        debug!(host = %options.host, port = options.port, user = %options.username, "amqp connection established");
        Ok(Arc::new(AmqpConnection { inner }))
    }
}

struct AmqpConnection {
    inner: lapin::Connection,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        if !self.inner.status().connected() {
            return Err(TransportError::ConnectionClosed);
        }
        let inner = self.inner.create_channel().await?;
        Ok(Arc::new(AmqpChannel { inner }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.inner.status().connected() {
            return Ok(());
        }
        self.inner.close(REPLY_SUCCESS, "closed by client").await?;
        Ok(())
    }
}

struct AmqpChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_fanout_topic(&self, name: &str) -> Result<(), TransportError> {
        self.inner
            .exchange_declare(
                name,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<QueueId, TransportError> {
        let options = QueueDeclareOptions {
            exclusive: true,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .inner
            .queue_declare("", options, FieldTable::default())
            .await?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError> {
        self.inner
            .queue_bind(queue, topic, "", QueueBindOptions::default(), FieldTable::default())
            .await?;
        Ok(())
    }

    async fn set_unacknowledged_limit(&self, limit: u16) -> Result<(), TransportError> {
        self.inner.basic_qos(limit, BasicQosOptions::default()).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        // AMQP timestamps are whole seconds
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_timestamp(now);
        self.inner
            .basic_publish(topic, "", BasicPublishOptions::default(), &payload, properties)
            .await?
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        let consumer_tag = format!("fanbus.ctag-{}", Uuid::new_v4().simple());
        let mut consumer = self
            .inner
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = queue.to_string();
        tokio::spawn(async move {
            while let Some(item) = consumer.next().await {
                match item {
                    Ok(delivery) => {
                        let published_at = published_millis(delivery.properties.timestamp());
                        let forwarded = sender.send(Delivery {
                            tag: delivery.delivery_tag,
                            payload: delivery.data,
                            published_at,
                        });
                        if forwarded.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(%queue, "amqp consumer failed: {e}");
                        break;
                    }
                }
            }
            debug!(%queue, consumer = %consumer_tag, "amqp consumer ended");
        });
        Ok(receiver)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError> {
        self.inner.basic_ack(tag, BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close(REPLY_SUCCESS, "closed by client").await?;
        Ok(())
    }
}

/// Milliseconds since epoch from an AMQP timestamp, or the receipt time when
/// the publisher did not set one.
pub(crate) fn published_millis(timestamp: &Option<u64>) -> i64 {
    timestamp
        .and_then(|secs| i64::try_from(secs).ok())
        .map_or_else(|| Utc::now().timestamp_millis(), |secs| secs.saturating_mul(1000))
}
