//! In-memory transport
//!
//! Connects bus contexts to a [`Broker`] living in the same process. Every
//! connection made through one `MemoryTransport` shares its broker, so two
//! contexts bound to the same topic see each other's messages exactly as they
//! would through a network broker. Host and port are ignored.

use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{Channel, Connection, ConnectionOptions, DeliveryStream, DeliveryTag, QueueId, Transport};
use crate::broker::{Broker, ChannelId, ConnectionId};
use crate::utils::error::TransportError;

#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Mutex<Broker>>,
    credentials: Option<(String, String)>,
}

impl MemoryTransport {
    pub fn new(broker: Arc<Mutex<Broker>>) -> Self {
        Self {
            broker,
            credentials: None,
        }
    }

    /// Only accept connections presenting these credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// The broker behind this transport, for inspection.
    pub fn broker(&self) -> Arc<Mutex<Broker>> {
        Arc::clone(&self.broker)
    }
}

pub(crate) fn lock(broker: &Mutex<Broker>) -> Result<MutexGuard<'_, Broker>, TransportError> {
    broker.lock().map_err(|_| TransportError::LockPoisoned)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn Connection>, TransportError> {
        if let Some((username, password)) = &self.credentials {
            if *username != options.username || *password != options.password {
                return Err(TransportError::AuthenticationFailed(options.username.clone()));
            }
        }

        let id = lock(&self.broker)?.open_connection();
        debug!(connection = %id, user = %options.username, "in-memory connection established");
        Ok(Arc::new(MemoryConnection {
            broker: Arc::clone(&self.broker),
            id,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    broker: Arc<Mutex<Broker>>,
    id: ConnectionId,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let id = lock(&self.broker)?.open_channel(&self.id)?;
        Ok(Arc::new(MemoryChannel {
            broker: Arc::clone(&self.broker),
            id,
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.broker)?.close_connection(&self.id)?;
        Ok(())
    }
}

struct MemoryChannel {
    broker: Arc<Mutex<Broker>>,
    id: ChannelId,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_fanout_topic(&self, name: &str) -> Result<(), TransportError> {
        Ok(lock(&self.broker)?.declare_topic(self.id, name)?)
    }

    async fn declare_exclusive_queue(&self) -> Result<QueueId, TransportError> {
        Ok(lock(&self.broker)?.declare_exclusive_queue(self.id)?)
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> Result<(), TransportError> {
        Ok(lock(&self.broker)?.bind_queue(self.id, queue, topic)?)
    }

    async fn set_unacknowledged_limit(&self, limit: u16) -> Result<(), TransportError> {
        Ok(lock(&self.broker)?.set_prefetch(self.id, limit)?)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        lock(&self.broker)?.publish(self.id, topic, payload)?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        Ok(lock(&self.broker)?.consume(self.id, queue)?)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), TransportError> {
        Ok(lock(&self.broker)?.ack(self.id, tag)?)
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(lock(&self.broker)?.close_channel(self.id)?)
    }
}
