//! Per-connection session state
//!
//! `Session` models a connected client and holds the sending side of a
//! per-client channel used by the server to push frames. The
//! `authenticated` flag and the broker connection id are set after a
//! successful login.

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::ConnectionId;
use crate::transport::message::ServerFrame;

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub sender: UnboundedSender<WsMessage>,
    pub authenticated: bool,
    pub connection: Option<ConnectionId>,
}

impl Session {
    /// Create a new session with a sender channel. The `id` only labels the
    /// session in logs; the broker knows it by `connection` once logged in.
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
            authenticated: false,
            connection: None,
        }
    }

    /// Queue a frame for the send loop. Returns false once the loop is gone.
    pub fn send(&self, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.sender.send(WsMessage::text(text)).is_ok(),
            Err(e) => {
                warn!(session = %self.id, "failed to serialize frame: {e}");
                false
            }
        }
    }
}
