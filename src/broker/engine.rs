//! Broker engine
//!
//! This module contains the in-process fanout broker responsible for:
//! - tracking connections and the channels opened on them
//! - declaring topics and exclusive queues, and binding one to the other
//! - copying every publish into each bound queue
//! - handing queued payloads to consumers, capped by the channel prefetch
//! - tracking unacknowledged deliveries until they are ACKed
//!
//! Concurrency and usage notes:
//! - The API here is synchronous and designed to be held behind a lock (for
//!   example `Arc<Mutex<Broker>>`) by the transports. Callers must not hold
//!   the broker lock across an await point.
//! - Deliveries are pushed into unbounded tokio channels, so `publish` and
//!   `ack` never block on a slow consumer; the prefetch cap is what bounds
//!   the number of deliveries a consumer holds at once.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::queue::{Consumer, Queue, QueuedMessage};
use super::topic::Topic;
use crate::transport::{Delivery, DeliveryStream, DeliveryTag, QueueId};
use crate::utils::error::BrokerError;

pub type ConnectionId = String;
pub type ChannelId = u64;

#[derive(Debug)]
struct ChannelState {
    connection: ConnectionId,
    /// 0 means unlimited.
    prefetch: u16,
}

/// A delivery handed to a consumer that has not been acknowledged yet.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub queue: QueueId,
    pub channel: ChannelId,
    pub message: QueuedMessage,
}

#[derive(Debug, Default)]
pub struct Broker {
    topics: HashMap<String, Topic>,
    queues: HashMap<QueueId, Queue>,
    connections: HashMap<ConnectionId, Vec<ChannelId>>,
    channels: HashMap<ChannelId, ChannelState>,
    pending_acks: HashMap<DeliveryTag, PendingDelivery>,
    next_channel: ChannelId,
    next_tag: DeliveryTag,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its id.
    pub fn open_connection(&mut self) -> ConnectionId {
        let id = Uuid::new_v4().to_string();
        self.connections.insert(id.clone(), Vec::new());
        debug!(connection = %id, "connection opened");
        id
    }

    pub fn open_channel(&mut self, connection: &str) -> Result<ChannelId, BrokerError> {
        let channels = self
            .connections
            .get_mut(connection)
            .ok_or_else(|| BrokerError::UnknownConnection(connection.to_string()))?;

        self.next_channel += 1;
        let id = self.next_channel;
        channels.push(id);
        self.channels.insert(
            id,
            ChannelState {
                connection: connection.to_string(),
                prefetch: 0,
            },
        );
        Ok(id)
    }

    /// Closes a channel. Its consumers are cancelled and every delivery it
    /// still holds unacknowledged goes back to the front of its queue.
    pub fn close_channel(&mut self, channel: ChannelId) -> Result<(), BrokerError> {
        let state = self
            .channels
            .remove(&channel)
            .ok_or(BrokerError::UnknownChannel(channel))?;

        if let Some(channels) = self.connections.get_mut(&state.connection) {
            channels.retain(|c| *c != channel);
        }

        let mut touched = Vec::new();
        for queue in self.queues.values_mut() {
            if queue.consumer.as_ref().is_some_and(|c| c.channel == channel) {
                queue.consumer = None;
                touched.push(queue.name.clone());
            }
        }

        let mut requeue: Vec<(DeliveryTag, PendingDelivery)> = self
            .pending_acks
            .iter()
            .filter(|(_, p)| p.channel == channel)
            .map(|(tag, p)| (*tag, p.clone()))
            .collect();
        // newest first, so push_front leaves them in original order
        requeue.sort_by(|a, b| b.0.cmp(&a.0));
        for (tag, pending) in requeue {
            self.pending_acks.remove(&tag);
            if let Some(queue) = self.queues.get_mut(&pending.queue) {
                queue.backlog.push_front(pending.message);
            }
        }

        debug!(channel, cancelled_consumers = touched.len(), "channel closed");
        Ok(())
    }

    /// Closes a connection with all its channels and deletes the exclusive
    /// queues it declared. Consumers of those queues see their delivery
    /// stream end.
    pub fn close_connection(&mut self, connection: &str) -> Result<(), BrokerError> {
        let channels = self
            .connections
            .remove(connection)
            .ok_or_else(|| BrokerError::UnknownConnection(connection.to_string()))?;

        for channel in channels {
            // the connection entry is gone, so close_channel cannot fail on it
            let _ = self.close_channel(channel);
        }

        let owned: Vec<QueueId> = self
            .queues
            .values()
            .filter(|q| q.owner == connection)
            .map(|q| q.name.clone())
            .collect();

        for name in &owned {
            self.queues.remove(name);
            for topic in self.topics.values_mut() {
                topic.unbind(name);
            }
        }
        self.pending_acks.retain(|_, p| !owned.contains(&p.queue));

        debug!(connection, deleted_queues = owned.len(), "connection closed");
        Ok(())
    }

    /// Declares a fanout topic. Declaring an existing topic is a no-op.
    pub fn declare_topic(&mut self, channel: ChannelId, name: &str) -> Result<(), BrokerError> {
        self.channel_state(channel)?;
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Topic::new(name));
        Ok(())
    }

    /// Declares a server-named queue owned by the channel's connection.
    pub fn declare_exclusive_queue(&mut self, channel: ChannelId) -> Result<QueueId, BrokerError> {
        let owner = self.channel_state(channel)?.connection.clone();
        let name = format!("fanbus.gen-{}", Uuid::new_v4().simple());
        self.queues
            .insert(name.clone(), Queue::new(name.clone(), owner));
        Ok(name)
    }

    pub fn bind_queue(
        &mut self,
        channel: ChannelId,
        queue: &str,
        topic: &str,
    ) -> Result<(), BrokerError> {
        self.channel_state(channel)?;
        if !self.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let topic = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        topic.bind(queue.to_string());
        Ok(())
    }

    /// Caps the unacknowledged deliveries each consumer on `channel` may hold.
    /// `0` removes the cap.
    pub fn set_prefetch(&mut self, channel: ChannelId, limit: u16) -> Result<(), BrokerError> {
        self.channels
            .get_mut(&channel)
            .ok_or(BrokerError::UnknownChannel(channel))?
            .prefetch = limit;
        Ok(())
    }

    /// Copies `payload` into every queue bound to `topic` and returns how many
    /// queues it was routed to.
    pub fn publish(
        &mut self,
        channel: ChannelId,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<usize, BrokerError> {
        self.channel_state(channel)?;
        let bindings = self
            .topics
            .get(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?
            .bindings
            .clone();

        let message = QueuedMessage {
            payload,
            published_at: chrono::Utc::now().timestamp_millis(),
        };

        for queue_id in &bindings {
            if let Some(queue) = self.queues.get_mut(queue_id) {
                queue.backlog.push_back(message.clone());
            }
            self.pump(queue_id);
        }

        if bindings.is_empty() {
            debug!(topic, "published to a topic with no bound queues");
        }
        Ok(bindings.len())
    }

    /// Starts consuming `queue` on `channel`. Deliveries must be ACKed through
    /// the same channel.
    pub fn consume(&mut self, channel: ChannelId, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let connection = self.channel_state(channel)?.connection.clone();
        let target = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

        if target.owner != connection {
            return Err(BrokerError::ResourceLocked(queue.to_string()));
        }
        if target.consumer.is_some() {
            return Err(BrokerError::QueueInUse(queue.to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        target.consumer = Some(Consumer {
            channel,
            sender,
            unacked: 0,
        });
        self.pump(queue);
        Ok(receiver)
    }

    pub fn ack(&mut self, channel: ChannelId, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.channel_state(channel)?;
        let pending = match self.pending_acks.remove(&tag) {
            Some(pending) if pending.channel == channel => pending,
            Some(pending) => {
                // delivery tags are scoped to the channel that received them
                self.pending_acks.insert(tag, pending);
                return Err(BrokerError::UnknownDeliveryTag(tag));
            }
            None => return Err(BrokerError::UnknownDeliveryTag(tag)),
        };

        if let Some(consumer) = self
            .queues
            .get_mut(&pending.queue)
            .and_then(|q| q.consumer.as_mut())
        {
            consumer.unacked = consumer.unacked.saturating_sub(1);
        }
        self.pump(&pending.queue);
        Ok(())
    }

    /// Hands backlog entries to the queue's consumer while it is under its
    /// prefetch cap.
    fn pump(&mut self, queue_id: &str) {
        let Some(queue) = self.queues.get_mut(queue_id) else {
            return;
        };
        let Some(consumer) = queue.consumer.as_mut() else {
            return;
        };
        let limit = self
            .channels
            .get(&consumer.channel)
            .map_or(0, |c| c.prefetch as usize);

        let mut detached = false;
        while limit == 0 || consumer.unacked < limit {
            let Some(message) = queue.backlog.pop_front() else {
                break;
            };

            self.next_tag += 1;
            let tag = self.next_tag;
            let delivery = Delivery {
                tag,
                payload: message.payload.clone(),
                published_at: message.published_at,
            };

            if consumer.sender.send(delivery).is_err() {
                warn!(queue = queue_id, "consumer went away, keeping message queued");
                queue.backlog.push_front(message);
                detached = true;
                break;
            }

            consumer.unacked += 1;
            self.pending_acks.insert(
                tag,
                PendingDelivery {
                    queue: queue_id.to_string(),
                    channel: consumer.channel,
                    message,
                },
            );
        }

        if detached {
            queue.consumer = None;
        }
    }

    fn channel_state(&self, channel: ChannelId) -> Result<&ChannelState, BrokerError> {
        self.channels
            .get(&channel)
            .ok_or(BrokerError::UnknownChannel(channel))
    }

    /// The connection a channel was opened on.
    pub fn channel_owner(&self, channel: ChannelId) -> Option<&str> {
        self.channels.get(&channel).map(|c| c.connection.as_str())
    }

    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.get(name)
    }

    pub fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    /// Deliveries the queue's consumer holds unacknowledged.
    pub fn unacked_count(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(Queue::unacked)
    }

    /// Messages waiting in the queue for a free prefetch slot or a consumer.
    pub fn backlog_len(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(Queue::backlog_len)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliveries handed out and not yet acknowledged, across all queues.
    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.len()
    }

    pub fn pending_acks(&self) -> impl Iterator<Item = (&DeliveryTag, &PendingDelivery)> {
        self.pending_acks.iter()
    }
}
