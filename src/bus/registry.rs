//! Subscription registry
//!
//! Maps a message type to the handlers subscribed to it. The wildcard entry
//! [`WILDCARD`] exists from the start and its handlers match every type.
//!
//! Concurrency note: the registry is shared between `subscribe` callers and
//! running dispatch pipelines. `resolve` returns an owned snapshot, so a
//! subscription added while a chain runs only affects later deliveries.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::handler::MessageHandler;

/// The reserved type key whose handlers run for every message.
pub const WILDCARD: &str = "*";

pub struct SubscriptionRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn MessageHandler>>>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(WILDCARD.to_string(), Vec::new());
        Self {
            handlers: RwLock::new(handlers),
        }
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list for `message_type`. Registering the same
    /// handler twice makes it run twice.
    pub fn subscribe(&self, message_type: &str, handler: Arc<dyn MessageHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(message_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Wildcard handlers followed by the handlers for `message_type`, each in
    /// registration order. A message whose type is `*` itself therefore runs
    /// the wildcard list twice.
    pub fn resolve(&self, message_type: &str) -> Vec<Arc<dyn MessageHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);

        let mut resolved: Vec<Arc<dyn MessageHandler>> =
            handlers.get(WILDCARD).cloned().unwrap_or_default();
        if let Some(specific) = handlers.get(message_type) {
            resolved.extend(specific.iter().cloned());
        }
        resolved
    }

    /// Number of handlers registered directly under `message_type`.
    pub fn handler_count(&self, message_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message_type)
            .map_or(0, Vec::len)
    }
}
