//! The `server` module exposes an in-process [`Broker`](crate::broker::Broker)
//! to other processes over WebSockets.
//!
//! It accepts connections, requires a `login` with the configured
//! credentials, and translates each request frame into a broker operation.
//! [`WebSocketTransport`](crate::transport::WebSocketTransport) is its client.

pub mod session;
pub mod websocket;

pub use websocket::{serve, start_broker_server};
