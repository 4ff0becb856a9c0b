//! # fanbus
//!
//! `fanbus` is a typed pub/sub layer over a fanout message broker. Publishers
//! put `{type, data}` messages on a named topic; every context bound to that
//! topic receives a copy, resolves the handlers registered for the message
//! type (plus the `*` wildcard handlers), runs them one after another and
//! republishes the events they return.
//!
//! ## Core Modules
//!
//! - `bus`: contexts, the subscription registry, the publisher and the dispatch engine.
//! - `transport`: the broker transport contract with AMQP, in-memory and WebSocket implementations.
//! - `broker`: the in-process fanout broker engine behind the in-memory and WebSocket transports.
//! - `server`: serves a broker engine to remote `WebSocketTransport` clients.
//! - `config`: loads connection, server, dispatch and logging settings.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod bus;
pub mod config;
pub mod server;
pub mod transport;
pub mod utils;

pub use bus::{
    Bus, BusContext, Event, ListenOptions, Message, MessageHandler, WILDCARD, handler_fn,
};
pub use transport::ConnectionOptions;
pub use utils::error::{BrokerError, BusError, HandlerError, TransportError};
