use std::sync::Arc;

use tracing::debug;

use super::message::Message;
use crate::transport::Channel;
use crate::utils::error::BusError;

/// Serializes messages and hands them to the transport for fanout on one topic.
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<dyn Channel>,
    topic: String,
}

impl Publisher {
    pub fn new(channel: Arc<dyn Channel>, topic: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
        }
    }

    /// Completes once the transport accepted the message. Transport failures
    /// are returned as is, never retried.
    pub async fn publish(&self, message: &Message) -> Result<(), BusError> {
        let payload = message.to_bytes()?;
        self.channel.publish(&self.topic, payload).await?;
        debug!(topic = %self.topic, message_type = message.message_type(), "message published");
        Ok(())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
