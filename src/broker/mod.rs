//! The broker crate module contains the in-process fanout broker
//! responsible for topics, exclusive queues, prefetch-capped delivery and
//! acknowledgement tracking.
//!
//! It is used directly by the in-memory transport and served over the
//! network by the broker server.

pub mod engine;
pub mod queue;
pub mod topic;

pub use engine::{Broker, ChannelId, ConnectionId, PendingDelivery};
