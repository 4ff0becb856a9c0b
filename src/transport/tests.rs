use super::amqp::{amqp_uri, published_millis};
use super::memory::MemoryTransport;
use super::message::{ClientFrame, ServerFrame};
use super::{ConnectionOptions, Delivery, Transport};
use crate::config::Settings;
use crate::utils::error::TransportError;
use chrono::{TimeZone, Utc};
use serde_json::json;

#[test]
fn test_connection_options_defaults() {
    let options = ConnectionOptions::default();
    assert_eq!(options.host, "localhost");
    assert_eq!(options.port, 5672);
    assert_eq!(options.username, "guest");
    assert_eq!(options.password, "guest");

    let custom = ConnectionOptions::new("broker", 7000).with_credentials("app", "secret");
    assert_eq!(custom.host, "broker");
    assert_eq!(custom.port, 7000);
    assert_eq!(custom.username, "app");
}

#[test]
fn test_amqp_uri_from_options() {
    let options = ConnectionOptions::new("rabbit.internal", 5673).with_credentials("app", "p@ss/word");
    let uri = amqp_uri(&options);

    assert_eq!(uri.authority.host, "rabbit.internal");
    assert_eq!(uri.authority.port, 5673);
    // credentials are passed as-is, no URL encoding involved
    assert_eq!(uri.authority.userinfo.username, "app");
    assert_eq!(uri.authority.userinfo.password, "p@ss/word");
    assert_eq!(uri.vhost, "/");
}

#[test]
fn test_amqp_timestamp_conversion() {
    assert_eq!(published_millis(&Some(1_700_000_000)), 1_700_000_000_000);

    let before = Utc::now().timestamp_millis();
    let fallback = published_millis(&None);
    assert!(fallback >= before);
}

#[test]
fn test_delivery_published_time() {
    let delivery = Delivery {
        tag: 1,
        payload: Vec::new(),
        published_at: 1_700_000_000_123,
    };
    let expected = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
    assert_eq!(delivery.published_time(), Some(expected));

    let out_of_range = Delivery {
        published_at: i64::MAX,
        ..delivery
    };
    assert_eq!(out_of_range.published_time(), None);
}

#[test]
fn test_connection_options_from_settings() {
    let settings = Settings::default();
    let options = ConnectionOptions::from(&settings.broker);
    assert_eq!(options, ConnectionOptions::default());
}

#[test]
fn test_client_frame_shape() {
    let frame = ClientFrame::Publish {
        request: 7,
        channel: 1,
        topic: "orders".to_string(),
        payload: "{}".to_string(),
    };
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(
        value,
        json!({"type": "publish", "request": 7, "channel": 1, "topic": "orders", "payload": "{}"})
    );
    assert_eq!(frame.request(), Some(7));

    let login: ClientFrame =
        serde_json::from_value(json!({"type": "login", "username": "u", "password": "p"})).unwrap();
    assert_eq!(login.request(), None);
}

#[test]
fn test_server_frame_shape() {
    let ok = serde_json::to_value(ServerFrame::ok(3)).unwrap();
    assert_eq!(ok, json!({"type": "ok", "request": 3}));

    let parsed: ServerFrame =
        serde_json::from_value(json!({"type": "ok", "request": 4, "queue": "q"})).unwrap();
    assert_eq!(
        parsed,
        ServerFrame::Ok {
            request: 4,
            channel: None,
            queue: Some("q".to_string())
        }
    );

    let login_ok = serde_json::to_string(&ServerFrame::LoginOk {}).unwrap();
    assert_eq!(login_ok, r#"{"type":"login_ok"}"#);
}

#[tokio::test]
async fn test_memory_transport_round_trip() {
    let transport = MemoryTransport::default();
    let connection = transport.connect(&ConnectionOptions::default()).await.unwrap();
    let channel = connection.open_channel().await.unwrap();

    channel.declare_fanout_topic("orders").await.unwrap();
    let queue = channel.declare_exclusive_queue().await.unwrap();
    channel.bind_queue(&queue, "orders").await.unwrap();
    let mut deliveries = channel.consume(&queue).await.unwrap();

    let before = Utc::now().timestamp_millis();
    channel.publish("orders", b"payload".to_vec()).await.unwrap();
    let delivery = deliveries.recv().await.unwrap();
    assert_eq!(delivery.payload, b"payload");
    assert!(delivery.published_at >= before);
    assert!(delivery.published_time().unwrap() <= Utc::now());

    channel.ack(delivery.tag).await.unwrap();
    assert_eq!(transport.broker().lock().unwrap().pending_ack_count(), 0);

    connection.close().await.unwrap();
    assert!(deliveries.recv().await.is_none());
}

#[tokio::test]
async fn test_memory_transport_checks_credentials() {
    let transport = MemoryTransport::default().with_credentials("app", "secret");

    let err = transport
        .connect(&ConnectionOptions::default())
        .await
        .err()
        .expect("guest should be rejected");
    assert!(matches!(err, TransportError::AuthenticationFailed(user) if user == "guest"));

    let options = ConnectionOptions::default().with_credentials("app", "secret");
    assert!(transport.connect(&options).await.is_ok());
}

#[tokio::test]
async fn test_memory_channel_unusable_after_close() {
    let transport = MemoryTransport::default();
    let connection = transport.connect(&ConnectionOptions::default()).await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    channel.declare_fanout_topic("orders").await.unwrap();

    connection.close().await.unwrap();
    // closing twice is harmless
    connection.close().await.unwrap();

    let err = channel.publish("orders", b"x".to_vec()).await.unwrap_err();
    assert!(matches!(err, TransportError::Broker(_)));
    assert!(matches!(
        connection.open_channel().await.err(),
        Some(TransportError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_memory_channel_close_requeues_and_keeps_connection() {
    let transport = MemoryTransport::default();
    let connection = transport.connect(&ConnectionOptions::default()).await.unwrap();
    let channel = connection.open_channel().await.unwrap();

    channel.declare_fanout_topic("orders").await.unwrap();
    let queue = channel.declare_exclusive_queue().await.unwrap();
    channel.bind_queue(&queue, "orders").await.unwrap();
    let mut deliveries = channel.consume(&queue).await.unwrap();
    channel.publish("orders", b"first".to_vec()).await.unwrap();
    let unacked = deliveries.recv().await.unwrap();

    channel.close().await.unwrap();
    assert!(deliveries.recv().await.is_none());
    {
        let broker = transport.broker();
        let broker = broker.lock().unwrap();
        assert_eq!(broker.backlog_len(&queue), Some(1));
        assert_eq!(broker.pending_ack_count(), 0);
    }
    assert!(matches!(
        channel.ack(unacked.tag).await,
        Err(TransportError::Broker(_))
    ));

    // the queue outlives the channel and redelivers on a new one
    let reopened = connection.open_channel().await.unwrap();
    let mut deliveries = reopened.consume(&queue).await.unwrap();
    assert_eq!(deliveries.recv().await.unwrap().payload, b"first");

    connection.close().await.unwrap();
}
