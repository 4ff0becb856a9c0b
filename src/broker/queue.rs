//! Queues hold published payloads until they are handed to a consumer.
//!
//! Every queue is exclusive to the connection that declared it and has at
//! most one consumer.

use std::collections::VecDeque;

use tokio::sync::mpsc::UnboundedSender;

use super::ChannelId;
use crate::transport::{Delivery, QueueId};

/// A payload waiting in a queue backlog, or handed out and awaiting an ACK.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub payload: Vec<u8>,
    pub published_at: i64,
}

#[derive(Debug)]
pub(crate) struct Consumer {
    pub channel: ChannelId,
    pub sender: UnboundedSender<Delivery>,
    pub unacked: usize,
}

#[derive(Debug)]
pub struct Queue {
    pub name: QueueId,
    pub owner: String,
    pub(crate) backlog: VecDeque<QueuedMessage>,
    pub(crate) consumer: Option<Consumer>,
}

impl Queue {
    pub fn new(name: QueueId, owner: String) -> Self {
        Self {
            name,
            owner,
            backlog: VecDeque::new(),
            consumer: None,
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer.is_some()
    }

    pub fn unacked(&self) -> usize {
        self.consumer.as_ref().map_or(0, |c| c.unacked)
    }
}
