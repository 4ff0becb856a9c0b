use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanbus::broker::Broker;
use fanbus::config::ServerSettings;
use fanbus::server::serve;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::time::timeout;

/// `fanbus publish` against the WebSocket broker on `port`.
fn publish(port: u16, data: &str) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_fanbus"));
    command
        .args(["publish", "--topic", "orders", "--type", "order_placed", "--data", data])
        .env("FANBUS__BROKER__TRANSPORT", "websocket")
        .env("FANBUS__BROKER__HOST", "127.0.0.1")
        .env("FANBUS__BROKER__PORT", port.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn publish_succeeds_against_a_running_server() {
    let broker = Arc::new(Mutex::new(Broker::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let settings = ServerSettings {
        host: "127.0.0.1".to_string(),
        port,
        username: "guest".to_string(),
        password: "guest".to_string(),
    };
    tokio::spawn(serve(listener, Arc::clone(&broker), settings));

    let status = timeout(Duration::from_secs(30), publish(port, r#"{"id": 7}"#).status())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());
    assert!(broker.lock().unwrap().topic("orders").is_some());
}

#[tokio::test]
async fn publish_exits_with_failure_when_the_broker_is_unreachable() {
    let port = unused_port().await;

    let status = timeout(Duration::from_secs(30), publish(port, "{}").status())
        .await
        .unwrap()
        .unwrap();
    assert!(!status.success());
    assert_eq!(status.code(), Some(1));
}

#[tokio::test]
async fn publish_exits_with_failure_on_invalid_data() {
    let port = unused_port().await;

    let status = timeout(Duration::from_secs(30), publish(port, "not json").status())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
