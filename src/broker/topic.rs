//! Topic management
//!
//! A `Topic` is a fanout destination: it holds the ids of the queues bound to
//! it and every publish is copied into each of them. Binding the same queue
//! twice is a no-op.
//!
//! Concurrency note: callers must synchronize access to `Topic` (for example
//! via the broker lock) when modifying bindings.

use crate::transport::QueueId;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub bindings: Vec<QueueId>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bindings: Vec::new(),
        }
    }

    /// Bind a queue to the topic. Duplicate binds are ignored.
    pub fn bind(&mut self, queue: QueueId) {
        if !self.bindings.contains(&queue) {
            self.bindings.push(queue);
        }
    }

    /// Remove a queue binding from the topic.
    pub fn unbind(&mut self, queue: &str) {
        self.bindings.retain(|q| q != queue);
    }
}
