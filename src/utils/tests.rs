use super::error::{BrokerError, BusError, HandlerError, TransportError};
use super::logging;
use std::error::Error;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn parse_level_falls_back_to_info() {
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    assert_eq!(logging::parse_level(" trace "), tracing::Level::TRACE);
    assert_eq!(logging::parse_level("verbose"), tracing::Level::INFO);
}

#[test]
fn handler_error_keeps_source() {
    let json_err = serde_json::from_str::<u8>("\"x\"").unwrap_err();
    let err = HandlerError::from(json_err);
    assert_eq!(err.message(), "message data has an unexpected shape");
    assert!(err.source().is_some());

    let plain = HandlerError::new("boom");
    assert_eq!(plain.to_string(), "handler failed: boom");
    assert!(plain.source().is_none());
}

#[test]
fn broker_error_converts_into_bus_error() {
    let err: BusError = BrokerError::UnknownTopic("orders".to_string()).into();
    match err {
        BusError::Transport(TransportError::Broker(BrokerError::UnknownTopic(name))) => {
            assert_eq!(name, "orders")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
