//! The `error` module defines the error types used within `fanbus`.
//!
//! Failures are grouped by the layer that raises them:
//!
//! - [`BrokerError`]: the broker engine rejected an operation (unknown topic,
//!   queue, channel or delivery tag; queue ownership violations).
//! - [`TransportError`]: the connection or channel to the broker is not usable.
//! - [`HandlerError`]: a message handler failed.
//! - [`BusError`]: everything the public bus surface can return.

use std::error::Error as StdError;

use thiserror::Error;

use crate::broker::ChannelId;
use crate::transport::DeliveryTag;

/// Errors raised by the in-process broker engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("channel {0} is closed")]
    UnknownChannel(ChannelId),

    #[error("topic '{0}' has not been declared")]
    UnknownTopic(String),

    #[error("queue '{0}' does not exist")]
    UnknownQueue(String),

    #[error("queue '{0}' already has a consumer")]
    QueueInUse(String),

    #[error("queue '{0}' is exclusive to another connection")]
    ResourceLocked(String),

    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(DeliveryTag),
}

/// The connection or channel to the broker is not in a usable state.
///
/// Never retried by the bus; surfaced to whoever called `publish`, `listen`
/// or `create_context`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("authentication failed for user '{0}'")]
    AuthenticationFailed(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("broker rejected request: {0}")]
    Rejected(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("broker state lock poisoned")]
    LockPoisoned,
}

/// A message handler failed to process a message.
#[derive(Debug, Error)]
#[error("handler failed: {message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it reachable through `source()`.
    pub fn from_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_source("message data has an unexpected shape", err)
    }
}

/// Errors returned by the public bus surface.
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A payload could not be encoded to, or decoded from, the wire format.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<BrokerError> for BusError {
    fn from(err: BrokerError) -> Self {
        BusError::Transport(TransportError::Broker(err))
    }
}
