//! Frames exchanged between the WebSocket transport and the broker server.
//!
//! Every frame is a JSON text message tagged by `type`. After a successful
//! `login`, each client request carries a `request` id that the server echoes
//! in its `ok` or `error` reply; deliveries are pushed unsolicited.
//! Payloads travel as UTF-8 text, matching the bus wire format.

use serde::{Deserialize, Serialize};

use crate::broker::ChannelId;
use crate::transport::{DeliveryTag, QueueId};

pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Login {
        username: String,
        password: String,
    },
    OpenChannel {
        request: RequestId,
    },
    CloseChannel {
        request: RequestId,
        channel: ChannelId,
    },
    DeclareTopic {
        request: RequestId,
        channel: ChannelId,
        topic: String,
    },
    DeclareQueue {
        request: RequestId,
        channel: ChannelId,
    },
    BindQueue {
        request: RequestId,
        channel: ChannelId,
        queue: QueueId,
        topic: String,
    },
    Prefetch {
        request: RequestId,
        channel: ChannelId,
        limit: u16,
    },
    Publish {
        request: RequestId,
        channel: ChannelId,
        topic: String,
        payload: String,
    },
    Consume {
        request: RequestId,
        channel: ChannelId,
        queue: QueueId,
    },
    Ack {
        request: RequestId,
        channel: ChannelId,
        tag: DeliveryTag,
    },
}

impl ClientFrame {
    /// The request id, for every frame except `login`.
    pub fn request(&self) -> Option<RequestId> {
        match self {
            ClientFrame::Login { .. } => None,
            ClientFrame::OpenChannel { request }
            | ClientFrame::CloseChannel { request, .. }
            | ClientFrame::DeclareTopic { request, .. }
            | ClientFrame::DeclareQueue { request, .. }
            | ClientFrame::BindQueue { request, .. }
            | ClientFrame::Prefetch { request, .. }
            | ClientFrame::Publish { request, .. }
            | ClientFrame::Consume { request, .. }
            | ClientFrame::Ack { request, .. } => Some(*request),
        }
    }

    /// The channel a request operates on, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            ClientFrame::Login { .. } | ClientFrame::OpenChannel { .. } => None,
            ClientFrame::CloseChannel { channel, .. }
            | ClientFrame::DeclareTopic { channel, .. }
            | ClientFrame::DeclareQueue { channel, .. }
            | ClientFrame::BindQueue { channel, .. }
            | ClientFrame::Prefetch { channel, .. }
            | ClientFrame::Publish { channel, .. }
            | ClientFrame::Consume { channel, .. }
            | ClientFrame::Ack { channel, .. } => Some(*channel),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    LoginOk {},
    Ok {
        request: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<ChannelId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<QueueId>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<RequestId>,
        message: String,
    },
    Deliver {
        queue: QueueId,
        tag: DeliveryTag,
        payload: String,
        published_at: i64,
    },
}

impl ServerFrame {
    pub fn ok(request: RequestId) -> Self {
        ServerFrame::Ok {
            request,
            channel: None,
            queue: None,
        }
    }

    pub fn error(request: Option<RequestId>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            request,
            message: message.into(),
        }
    }
}
