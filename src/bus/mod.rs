//! The `bus` module is the typed pub/sub layer on top of a broker transport.
//!
//! ```text
//! Bus ── create_context(topic) ──► BusContext
//!                                   ├─ SubscriptionRegistry  type → handlers, "*" matches all
//!                                   ├─ Publisher             Message → JSON → Channel::publish
//!                                   └─ DispatchEngine        consume → resolve → handle
//!                                                            → republish events → ack
//! ```
//!
//! Handlers may return events; those are published onto the same topic
//! while the rest of the chain is still pending, so they can trigger further
//! dispatch. Nothing stops a handler from answering its own event type.

mod bus;
mod context;
mod dispatch;
mod handler;
mod message;
mod publisher;
mod registry;

pub use bus::Bus;
pub use context::BusContext;
pub use dispatch::{DispatchEngine, ListenOptions};
pub use handler::{FnHandler, MessageHandler, handler_fn};
pub use message::{Event, Message};
pub use publisher::Publisher;
pub use registry::{SubscriptionRegistry, WILDCARD};
